//! Prompt Builder - System instructions with embedded table schemas
//!
//! The system prompt is a fixed template; the only dynamic parts are the
//! table signatures inferred at refresh time and the paths of the persisted
//! parquet files the generated code is told to load.

use crate::dataset::DatasetStore;
use itertools::Itertools;

const TABLES_DEFINITIONS_TEMPLATE: &str = r#"Tables definitions:
We have 5 tables with the following column names and inferred types:

{table_blocks}"#;

const SYSTEM_PROMPT_TEMPLATE: &str = r#"Answer user queries related to supply chain data using the provided table definitions.

{tables_definitions}

Guidelines:
1. Identify the tables (among "clients", "items", "suppliers", "purchases" and "invoices") that contain the relevant information for the query.
2. To compute an answer, call the analysis tool with Python code. You are only allowed to use the pandas and numpy libraries.
   Load the tables from these parquet files:
{table_paths}
3. Every tool call runs in a fresh process: redo all imports and reload the tables in every call.

ALWAYS end the code with a print statement that outputs the answer.
ALWAYS make a single tool call at a time.
REMEMBER you can analyze multiple tables in one tool call with a single piece of Python code."#;

/// Render the block listing every loaded table with its signature.
pub fn render_tables_definitions(store: &DatasetStore) -> String {
    let blocks = store
        .signatures()
        .iter()
        .enumerate()
        .map(|(index, (table, signature))| {
            format!("{}. {}:\n{}", index + 1, capitalize(table.as_str()), signature.render())
        })
        .join("\n\n");
    TABLES_DEFINITIONS_TEMPLATE.replace("{table_blocks}", &blocks)
}

/// Render the full system prompt for the current dataset generation.
pub fn render_system_prompt(store: &DatasetStore) -> String {
    let paths = store
        .signatures()
        .iter()
        .map(|(table, _)| format!("   - '{}'", store.table_path(*table).display()))
        .join("\n");
    SYSTEM_PROMPT_TEMPLATE
        .replace("{tables_definitions}", &render_tables_definitions(store))
        .replace("{table_paths}", &paths)
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
