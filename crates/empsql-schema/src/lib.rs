//! Schema registry for the employees database
//!
//! Holds the fixed table/column description that grounds the model's output,
//! plus the prompt template and the canned overview reports built on it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod prompt;
pub mod reports;

pub use prompt::{PromptBuilder, ANCHOR};
pub use reports::Report;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already registered: {0}")]
    DuplicateTable(String),

    #[error("Primary key column {column} is not defined on table {table}")]
    UnknownKeyColumn { table: String, column: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, data_type: &str) -> Self {
        self.columns.push(ColumnDef::new(name, data_type));
        self
    }

    pub fn key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Render as a `CREATE TABLE` block.
    ///
    /// A single-column key is written inline on its column, a composite key
    /// as a trailing `PRIMARY KEY (...)` line.
    pub fn to_ddl(&self) -> String {
        let inline_key = match self.primary_key.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        };

        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                if inline_key == Some(col.name.as_str()) {
                    format!("    {} {} PRIMARY KEY", col.name, col.data_type)
                } else {
                    format!("    {} {}", col.name, col.data_type)
                }
            })
            .collect();

        if self.primary_key.len() > 1 {
            lines.push(format!("    PRIMARY KEY ({})", self.primary_key.join(", ")));
        }

        format!("CREATE TABLE {} (\n{}\n);", self.name, lines.join(",\n"))
    }
}

/// Immutable description of the tables the query executor can serve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaRegistry {
    tables: Vec<TableDef>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The employees sample database: employees, departments, department
    /// membership and management history, salaries and titles.
    pub fn employees() -> Self {
        let mut registry = Self::new();
        registry.register_builtins();
        registry
    }

    fn register_builtins(&mut self) {
        let builtins = [
            TableDef::new("employees")
                .column("emp_no", "INT")
                .column("birth_date", "DATE")
                .column("first_name", "VARCHAR(14)")
                .column("last_name", "VARCHAR(16)")
                .column("gender", "ENUM('M','F')")
                .column("hire_date", "DATE")
                .key(&["emp_no"]),
            TableDef::new("departments")
                .column("dept_no", "CHAR(4)")
                .column("dept_name", "VARCHAR(40)")
                .key(&["dept_no"]),
            TableDef::new("dept_emp")
                .column("emp_no", "INT")
                .column("dept_no", "CHAR(4)")
                .column("from_date", "DATE")
                .column("to_date", "DATE")
                .key(&["emp_no", "dept_no"]),
            TableDef::new("dept_manager")
                .column("emp_no", "INT")
                .column("dept_no", "CHAR(4)")
                .column("from_date", "DATE")
                .column("to_date", "DATE")
                .key(&["emp_no", "dept_no"]),
            TableDef::new("salaries")
                .column("emp_no", "INT")
                .column("salary", "INT")
                .column("from_date", "DATE")
                .column("to_date", "DATE")
                .key(&["emp_no", "from_date"]),
            TableDef::new("titles")
                .column("emp_no", "INT")
                .column("title", "VARCHAR(50)")
                .column("from_date", "DATE")
                .column("to_date", "DATE")
                .key(&["emp_no", "title", "from_date"]),
        ];

        self.tables.extend(builtins);
    }

    pub fn register(&mut self, table: TableDef) -> Result<(), RegistryError> {
        if self.contains_table(&table.name) {
            return Err(RegistryError::DuplicateTable(table.name));
        }

        for key in &table.primary_key {
            if !table.columns.iter().any(|c| &c.name == key) {
                return Err(RegistryError::UnknownKeyColumn {
                    table: table.name.clone(),
                    column: key.clone(),
                });
            }
        }

        self.tables.push(table);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<&TableDef, RegistryError> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| RegistryError::TableNotFound(name.to_string()))
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.table(name).is_ok()
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Textual schema description used as grounding context in prompts.
    ///
    /// Tables render in registration order, so the output is stable.
    pub fn description(&self) -> String {
        self.tables
            .iter()
            .map(TableDef::to_ddl)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tables() {
        let registry = SchemaRegistry::employees();

        assert_eq!(
            registry.table_names(),
            vec!["employees", "departments", "dept_emp", "dept_manager", "salaries", "titles"]
        );
        assert!(registry.contains_table("EMPLOYEES"));
        assert!(!registry.contains_table("payroll"));
    }

    #[test]
    fn test_builtin_keys_resolve() {
        let registry = SchemaRegistry::employees();

        for table in registry.tables() {
            assert!(!table.primary_key.is_empty(), "{} has no key", table.name);
        }
        let titles = registry.table("titles").unwrap();
        assert_eq!(titles.primary_key, vec!["emp_no", "title", "from_date"]);
    }

    #[test]
    fn test_inline_and_composite_keys() {
        let registry = SchemaRegistry::employees();

        let employees = registry.table("employees").unwrap().to_ddl();
        assert!(employees.starts_with("CREATE TABLE employees ("));
        assert!(employees.contains("    emp_no INT PRIMARY KEY,"));
        assert!(employees.ends_with("    hire_date DATE\n);"));

        let salaries = registry.table("salaries").unwrap().to_ddl();
        assert!(salaries.contains("    PRIMARY KEY (emp_no, from_date)\n);"));
    }

    #[test]
    fn test_description_is_stable() {
        let a = SchemaRegistry::employees().description();
        let b = SchemaRegistry::employees().description();

        assert_eq!(a, b);
        assert_eq!(a.matches("CREATE TABLE").count(), 6);
    }

    #[test]
    fn test_register_rejects_duplicates_and_bad_keys() {
        let mut registry = SchemaRegistry::employees();

        let dup = TableDef::new("Employees").column("emp_no", "INT");
        assert!(matches!(
            registry.register(dup),
            Err(RegistryError::DuplicateTable(_))
        ));

        let bad = TableDef::new("audit").column("id", "INT").key(&["missing"]);
        assert!(matches!(
            registry.register(bad),
            Err(RegistryError::UnknownKeyColumn { .. })
        ));
    }
}
