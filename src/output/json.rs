//! JSON output formatting

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::signal::Token;

/// Wrapper for JSON output with metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T> {
    pub data: T,
    pub meta: Metadata,
}

/// Metadata included in JSON output
#[derive(Debug, Serialize, Deserialize)]
pub struct Metadata {
    /// RFC 3339 time the output was produced
    pub timestamp: String,

    pub version: String,

    /// Invalidation token the data was read at, when known. Scripts holding
    /// derived views compare it against `podmirror signal show`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<i64>,
}

impl<T> JsonOutput<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            meta: Metadata {
                timestamp: Utc::now().to_rfc3339(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                token: None,
            },
        }
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.meta.token = Some(token.value());
        self
    }
}

/// Format data as pretty-printed JSON
pub fn format_json<T: Serialize + ?Sized>(data: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&JsonOutput::new(data))
}

/// Format data as pretty-printed JSON, stamped with the token it was read at
pub fn format_json_at<T: Serialize + ?Sized>(
    data: &T,
    token: Token,
) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&JsonOutput::new(data).with_token(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize)]
    struct Row {
        external_id: String,
        title: String,
    }

    #[test]
    fn test_format_json_wraps_data() {
        let rows = vec![Row {
            external_id: "show-1".to_string(),
            title: "Hard Fork".to_string(),
        }];

        let result = format_json(&rows).unwrap();

        assert!(result.contains("\"data\""));
        assert!(result.contains("\"meta\""));
        assert!(result.contains("\"external_id\": \"show-1\""));
        assert!(result.contains("\"version\""));
        // No token unless one was supplied
        assert!(!result.contains("\"token\""));
    }

    #[test]
    fn test_format_json_empty_vec() {
        let rows: Vec<Row> = vec![];
        let result = format_json(&rows).unwrap();
        assert!(result.contains("\"data\": []"));
    }

    #[test]
    fn test_format_json_at_includes_token() {
        let db = crate::store::Database::open_in_memory().unwrap();
        let signal = crate::signal::InvalidationSignal::new(db);
        let token = signal.bump().unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&format_json_at(&"x", token).unwrap()).unwrap();
        assert_eq!(value["meta"]["token"], token.value());
        assert_eq!(value["data"], "x");
    }
}
