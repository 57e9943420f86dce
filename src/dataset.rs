//! Dataset Store - Materialized supply-chain tables with type signatures
//!
//! Holds the five tables as polars DataFrames. A refresh authenticates once,
//! fetches all five tables, flattens and materializes them, persists them as
//! parquet, and only then swaps the complete set in. Any failure leaves the
//! previous generation authoritative, so readers never observe a mix of two
//! refresh generations. After refresh the store is treated as immutable for
//! the rest of the session.

use crate::error::{CopilotError, Result};
use crate::fetch::TableSource;
use crate::flatten::flatten_record;
use crate::tables::{TableName, TableSignature};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One materialized table: the frame plus its inferred column signature.
#[derive(Debug, Clone)]
pub struct TableData {
    pub frame: DataFrame,
    pub signature: TableSignature,
}

pub struct DatasetStore {
    data_dir: PathBuf,
    tables: HashMap<TableName, TableData>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl DatasetStore {
    /// Open a store rooted at `data_dir`, loading whatever persisted tables
    /// exist. Missing files are expected before the first refresh and are not
    /// an error.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;

        let mut store = Self {
            data_dir,
            tables: HashMap::new(),
            refreshed_at: None,
        };
        store.load_persisted()?;
        Ok(store)
    }

    fn load_persisted(&mut self) -> Result<()> {
        for table in TableName::ALL {
            let path = self.table_path(table);
            if !path.exists() {
                continue;
            }
            let file = std::fs::File::open(&path)?;
            let frame = ParquetReader::new(file)
                .finish()
                .map_err(|e| CopilotError::Polars(e.to_string()))?;
            let signature = TableSignature::from_frame(&frame);
            info!(
                "Loaded persisted table '{}' ({} rows, {} columns)",
                table,
                frame.height(),
                signature.columns.len()
            );
            self.tables.insert(table, TableData { frame, signature });
        }
        Ok(())
    }

    /// Fetch, flatten, and materialize all five tables. All-or-nothing: the
    /// in-memory set is swapped only after every table has been fetched,
    /// materialized, and persisted.
    pub async fn refresh(&mut self, source: &dyn TableSource) -> Result<()> {
        info!("Refreshing dataset from upstream");
        let token = source.acquire_token().await?;

        let mut staged: Vec<(TableName, TableData)> = Vec::with_capacity(TableName::ALL.len());
        for table in TableName::ALL {
            let rows = source.fetch_rows(table, &token).await?;
            let frame = drop_empty_columns(materialize(&rows)?)?;
            let signature = TableSignature::from_frame(&frame);
            info!(
                "Materialized '{}' ({} rows, {} columns)",
                table,
                frame.height(),
                signature.columns.len()
            );
            staged.push((table, TableData { frame, signature }));
        }

        for (table, data) in &staged {
            self.persist(*table, &data.frame)?;
        }

        self.tables = staged.into_iter().collect();
        self.refreshed_at = Some(Utc::now());
        Ok(())
    }

    /// Look a table up by name. Unknown names are rejected before any other
    /// work; a known name whose table has not been loaded yet means the store
    /// was never refreshed.
    pub fn get(&self, name: &str) -> Result<&TableData> {
        let table = TableName::parse(name)?;
        self.table(table)
    }

    pub fn table(&self, table: TableName) -> Result<&TableData> {
        self.tables.get(&table).ok_or_else(|| {
            CopilotError::Fetch(format!(
                "Table '{}' is not loaded; refresh the dataset first",
                table
            ))
        })
    }

    /// Signatures of all loaded tables, in catalog order.
    pub fn signatures(&self) -> Vec<(TableName, &TableSignature)> {
        TableName::ALL
            .iter()
            .filter_map(|table| self.tables.get(table).map(|d| (*table, &d.signature)))
            .collect()
    }

    /// True once all five tables are present.
    pub fn is_loaded(&self) -> bool {
        TableName::ALL.iter().all(|t| self.tables.contains_key(t))
    }

    pub fn table_path(&self, table: TableName) -> PathBuf {
        self.data_dir.join(format!("{}.parquet", table))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    fn persist(&self, table: TableName, frame: &DataFrame) -> Result<()> {
        // Parquet cannot represent a zero-column frame.
        if frame.width() == 0 {
            warn!("Table '{}' is empty upstream; nothing persisted", table);
            return Ok(());
        }
        let path = self.table_path(table);
        let mut file = std::fs::File::create(&path)?;
        ParquetWriter::new(&mut file)
            .finish(&mut frame.clone())
            .map_err(|e| CopilotError::Polars(e.to_string()))?;
        Ok(())
    }
}

/// Flatten every record and materialize the union of flat keys as a frame.
fn materialize(rows: &[Value]) -> Result<DataFrame> {
    if rows.is_empty() {
        return Ok(DataFrame::default());
    }
    let flat: Vec<Value> = rows
        .iter()
        .map(|row| Value::Object(flatten_record(row)))
        .collect();
    let bytes = serde_json::to_vec(&flat)?;
    JsonReader::new(Cursor::new(bytes))
        .finish()
        .map_err(|e| CopilotError::Polars(e.to_string()))
}

/// Drop columns that are null across every row, so the signature reflects
/// only populated columns.
fn drop_empty_columns(frame: DataFrame) -> Result<DataFrame> {
    let height = frame.height();
    if height == 0 {
        return Ok(frame);
    }
    let empty: Vec<String> = frame
        .get_columns()
        .iter()
        .filter(|s| s.null_count() == height)
        .map(|s| s.name().to_string())
        .collect();

    let mut frame = frame;
    for name in empty {
        frame = frame
            .drop(&name)
            .map_err(|e| CopilotError::Polars(e.to_string()))?;
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::ColumnType;
    use async_trait::async_trait;
    use serde_json::json;

    struct ScriptedSource {
        rows: HashMap<TableName, Vec<Value>>,
        fail_on: Option<TableName>,
    }

    impl ScriptedSource {
        fn uniform(rows: Vec<Value>) -> Self {
            let rows = TableName::ALL.iter().map(|t| (*t, rows.clone())).collect();
            Self {
                rows,
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl TableSource for ScriptedSource {
        async fn acquire_token(&self) -> Result<String> {
            Ok("scripted-token".to_string())
        }

        async fn fetch_rows(&self, table: TableName, token: &str) -> Result<Vec<Value>> {
            assert_eq!(token, "scripted-token");
            if self.fail_on == Some(table) {
                return Err(CopilotError::Fetch(format!(
                    "Fetch for '{}' returned 503",
                    table
                )));
            }
            Ok(self.rows.get(&table).cloned().unwrap_or_default())
        }
    }

    fn sample_rows() -> Vec<Value> {
        vec![
            json!({"id": 1, "info": {"name": "a"}, "ghost": null}),
            json!({"id": 2, "info": {"name": "b"}, "ghost": null}),
        ]
    }

    #[tokio::test]
    async fn refresh_drops_all_null_columns() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetStore::open(dir.path()).unwrap();

        store
            .refresh(&ScriptedSource::uniform(sample_rows()))
            .await
            .unwrap();

        let data = store.get("items").unwrap();
        assert_eq!(data.frame.height(), 2);
        let names: Vec<String> = data
            .signature
            .columns
            .iter()
            .map(|(n, _)| n.clone())
            .collect();
        assert!(names.contains(&"id".to_string()));
        assert!(names.contains(&"info_name".to_string()));
        assert!(!names.contains(&"ghost".to_string()), "all-null column kept");
        assert!(data
            .signature
            .columns
            .iter()
            .any(|(n, t)| n == "id" && *t == ColumnType::Int));
    }

    #[tokio::test]
    async fn failed_refresh_retains_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetStore::open(dir.path()).unwrap();

        store
            .refresh(&ScriptedSource::uniform(sample_rows()))
            .await
            .unwrap();
        assert!(store.is_loaded());

        let mut second = ScriptedSource::uniform(vec![
            json!({"id": 10}),
            json!({"id": 11}),
            json!({"id": 12}),
        ]);
        second.fail_on = Some(TableName::Suppliers);

        let err = store.refresh(&second).await.unwrap_err();
        assert!(matches!(err, CopilotError::Fetch(_)));

        // Every table still shows the first generation, never a mix.
        for table in TableName::ALL {
            assert_eq!(store.table(table).unwrap().frame.height(), 2);
        }
    }

    #[tokio::test]
    async fn failed_first_refresh_leaves_store_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetStore::open(dir.path()).unwrap();

        let mut source = ScriptedSource::uniform(sample_rows());
        source.fail_on = Some(TableName::Clients);
        assert!(store.refresh(&source).await.is_err());
        assert!(!store.is_loaded());
        assert!(store.table(TableName::Items).is_err());
    }

    #[tokio::test]
    async fn persisted_tables_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = DatasetStore::open(dir.path()).unwrap();
            store
                .refresh(&ScriptedSource::uniform(sample_rows()))
                .await
                .unwrap();
        }

        let reopened = DatasetStore::open(dir.path()).unwrap();
        assert!(reopened.is_loaded());
        assert_eq!(reopened.get("purchases").unwrap().frame.height(), 2);
    }

    #[test]
    fn unknown_table_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::open(dir.path()).unwrap();
        match store.get("warehouses") {
            Err(CopilotError::UnknownTable(name)) => assert_eq!(name, "warehouses"),
            other => panic!("expected UnknownTable, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn cold_start_with_no_files_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::open(dir.path()).unwrap();
        assert!(!store.is_loaded());
        assert!(store.signatures().is_empty());
    }
}
