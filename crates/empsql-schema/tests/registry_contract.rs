//! The registry, the prompt and the canned reports describe the same database

use empsql_schema::{reports, PromptBuilder, SchemaRegistry, ANCHOR};

/// Identifiers following FROM or JOIN in a report query.
fn referenced_tables(sql: &str) -> Vec<String> {
    let words: Vec<&str> = sql.split_whitespace().collect();
    words
        .windows(2)
        .filter(|pair| matches!(pair[0].to_ascii_uppercase().as_str(), "FROM" | "JOIN"))
        .map(|pair| pair[1].trim_end_matches(';').to_string())
        .collect()
}

#[test]
fn test_reports_only_touch_registered_tables() {
    let registry = SchemaRegistry::employees();

    for report in reports::overview() {
        let tables = referenced_tables(report.sql);
        assert!(!tables.is_empty(), "{}", report.name);
        for table in tables {
            assert!(registry.contains_table(&table), "{} uses {}", report.name, table);
        }
    }

    for table in referenced_tables(&reports::hired_in(1990)) {
        assert!(registry.contains_table(&table));
    }
}

#[test]
fn test_prompt_describes_every_table() {
    let registry = SchemaRegistry::employees();
    let prompt = PromptBuilder::new(&registry).build("Who manages the Finance department?");

    for name in registry.table_names() {
        assert!(prompt.contains(&format!("CREATE TABLE {} (", name)), "{}", name);
    }
    assert_eq!(prompt.matches(ANCHOR).count(), 1);
    assert!(prompt.trim_end().ends_with(ANCHOR));
}

#[test]
fn test_registry_serializes_for_tooling() {
    let registry = SchemaRegistry::employees();
    let value = serde_json::to_value(&registry).unwrap();

    let tables = value["tables"].as_array().unwrap();
    assert_eq!(tables.len(), 6);
    assert_eq!(tables[0]["name"], "employees");
    assert_eq!(tables[0]["primary_key"][0], "emp_no");
}
