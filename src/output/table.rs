//! Table output formatting

use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Rows},
};

/// One label/value line of a details table
#[derive(Debug, Tabled)]
pub struct FieldRow {
    #[tabled(rename = "FIELD")]
    pub field: String,
    #[tabled(rename = "VALUE")]
    pub value: String,
}

/// Format data as a table
pub fn format_table<T: Tabled>(data: &[T]) -> String {
    if data.is_empty() {
        return "No results found.".to_string();
    }

    let mut table = Table::new(data);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    table.to_string()
}

/// Format label/value pairs as a two-column table
pub fn format_fields(fields: &[(&str, String)]) -> String {
    let rows: Vec<FieldRow> = fields
        .iter()
        .map(|(field, value)| FieldRow {
            field: field.to_string(),
            value: value.clone(),
        })
        .collect();
    format_table(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Tabled)]
    struct TestRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "TITLE")]
        title: String,
    }

    #[test]
    fn test_format_table_empty() {
        let rows: Vec<TestRow> = vec![];
        assert_eq!(format_table(&rows), "No results found.");
    }

    #[test]
    fn test_format_table_rows() {
        let rows = vec![
            TestRow {
                id: "show-1".to_string(),
                title: "Hard Fork".to_string(),
            },
            TestRow {
                id: "show-2".to_string(),
                title: "The Daily".to_string(),
            },
        ];

        let result = format_table(&rows);

        assert!(result.contains("ID"));
        assert!(result.contains("TITLE"));
        assert!(result.contains("Hard Fork"));
        assert!(result.contains("The Daily"));
        // Rounded style uses ╭ for top-left corner
        assert!(result.contains("╭"));
    }

    #[test]
    fn test_format_fields() {
        let result = format_fields(&[("Token", "7".to_string()), ("Pending", "2".to_string())]);
        assert!(result.contains("FIELD"));
        assert!(result.contains("Token"));
        assert!(result.contains("Pending"));
    }
}
