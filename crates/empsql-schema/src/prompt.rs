//! Prompt template for natural language to SQL generation

use crate::SchemaRegistry;

/// Cue that ends every prompt. The extractor anchors on its last occurrence
/// in the completion.
pub const ANCHOR: &str = "SQL Query:";

const DEFAULT_DIALECT: &str = "DuckDB";

pub struct PromptBuilder {
    dialect: String,
    schema_text: String,
}

impl PromptBuilder {
    pub fn new(schema: &SchemaRegistry) -> Self {
        Self {
            dialect: DEFAULT_DIALECT.to_string(),
            schema_text: schema.description(),
        }
    }

    pub fn with_dialect(mut self, dialect: impl Into<String>) -> Self {
        self.dialect = dialect.into();
        self
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    /// The rendered schema block embedded in every prompt.
    pub fn schema_text(&self) -> &str {
        &self.schema_text
    }

    /// Compose the prompt for a single question.
    ///
    /// Pure string composition: the same schema and question always produce
    /// byte-identical output. The question is embedded verbatim.
    pub fn build(&self, question: &str) -> String {
        format!(
            "Task: Generate a {dialect} query to answer the following question.\n\
             \n\
             Database Schema:\n\
             {schema}\n\
             \n\
             Question: {question}\n\
             \n\
             Instructions:\n\
             - Generate only valid {dialect} syntax\n\
             - Generate a single read-only SELECT statement\n\
             - Use proper table joins when needed\n\
             - Include appropriate WHERE clauses for filtering\n\
             - If the question cannot be answered with the available schema, return 'I do not know'\n\
             \n\
             {anchor}\n",
            dialect = self.dialect,
            schema = self.schema_text,
            question = question,
            anchor = ANCHOR,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_schema_and_question() {
        let registry = SchemaRegistry::employees();
        let prompt = PromptBuilder::new(&registry).build("How many employees are there?");

        assert!(prompt.starts_with("Task: Generate a DuckDB query"));
        assert!(prompt.contains(&registry.description()));
        assert!(prompt.contains("Question: How many employees are there?\n"));
        assert!(prompt.ends_with("SQL Query:\n"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let registry = SchemaRegistry::employees();
        let builder = PromptBuilder::new(&registry);

        assert_eq!(builder.build("top salaries"), builder.build("top salaries"));
        assert_ne!(builder.build("top salaries"), builder.build("top titles"));
    }

    #[test]
    fn test_question_is_embedded_verbatim() {
        let registry = SchemaRegistry::employees();
        let question = "  weird {braces} and\nnewlines; DROP TABLE x  ";
        let prompt = PromptBuilder::new(&registry).build(question);

        assert!(prompt.contains(&format!("Question: {}\n", question)));
    }

    #[test]
    fn test_custom_dialect() {
        let registry = SchemaRegistry::employees();
        let prompt = PromptBuilder::new(&registry).with_dialect("MySQL").build("q");

        assert!(prompt.contains("Generate a MySQL query"));
        assert!(prompt.contains("- Generate only valid MySQL syntax"));
    }
}
