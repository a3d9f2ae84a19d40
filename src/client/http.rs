//! HTTP catalog provider

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use super::rate_limit::{EndpointCategory, RateLimiterSet};
use super::{CatalogItem, CatalogProvider};
use crate::cache::{ResultSet, SearchParams};
use crate::error::{Result, UpstreamError};
use crate::store::CatalogPayload;

/// Header carrying the provider API key
const API_KEY_HEADER: &str = "X-API-Key";

/// Catalog provider reached over HTTP.
///
/// `GET {base}/catalog/{external_id}` returns a payload and
/// `GET {base}/search` a result page. A 429 switches on reactive rate
/// limiting for that endpoint category.
#[derive(Clone)]
pub struct HttpCatalogProvider {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
    rate_limiters: Arc<RateLimiterSet>,
}

impl HttpCatalogProvider {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        requests_per_second: u32,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .user_agent(concat!("podmirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(UpstreamError::from)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            rate_limiters: Arc::new(RateLimiterSet::new(requests_per_second.max(1))),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<T, UpstreamError> {
        let category = EndpointCategory::from_path(path);
        self.rate_limiters.wait_for(category).await;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        log::debug!("GET {}", url);
        let response = request.send().await?;

        let status = response.status();
        match status {
            StatusCode::OK => response.json::<T>().await.map_err(|e| {
                UpstreamError::InvalidResponse(format!("Failed to parse response: {}", e))
            }),
            StatusCode::NOT_FOUND => {
                let error_msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Resource not found".to_string());
                Err(UpstreamError::NotFound(error_msg))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                self.rate_limiters.activate(category).await;
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                Err(UpstreamError::RateLimit(Duration::from_secs(retry_after)))
            }
            status if status.is_server_error() => {
                let error_msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("Server error: {}", status));
                Err(UpstreamError::ServerError(error_msg))
            }
            _ => Err(UpstreamError::InvalidResponse(format!(
                "Unexpected status code: {}",
                status
            ))),
        }
    }
}

#[async_trait]
impl CatalogProvider for HttpCatalogProvider {
    async fn fetch_catalog_entity(
        &self,
        external_id: &str,
    ) -> std::result::Result<CatalogPayload, UpstreamError> {
        let path = catalog_path(external_id);
        self.get_json(&path, &[]).await
    }

    async fn search(
        &self,
        params: &SearchParams,
    ) -> std::result::Result<ResultSet<CatalogItem>, UpstreamError> {
        let mut query = vec![
            ("q", params.query.trim().to_string()),
            ("sort_by", params.sort_by.as_str().to_string()),
            ("offset", params.offset.to_string()),
            ("limit", params.limit.to_string()),
        ];
        if let Some(genre) = params.genre_id {
            query.push(("genre_id", genre.to_string()));
        }
        self.get_json("/search", &query).await
    }
}

/// Path of a single catalog entity; the id is always one segment
fn catalog_path(external_id: &str) -> String {
    format!("/catalog/{}", urlencoding::encode(external_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_creation() {
        let provider = HttpCatalogProvider::new(
            "https://catalog.example.com/v1/",
            None,
            Duration::from_secs(15),
            5,
        );
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().base_url, "https://catalog.example.com/v1");
    }

    #[test]
    fn test_catalog_path_escapes_id() {
        assert_eq!(catalog_path("show-1_a.b~"), "/catalog/show-1_a.b~");
        assert_eq!(catalog_path("a/b c"), "/catalog/a%2Fb%20c");
    }
}
