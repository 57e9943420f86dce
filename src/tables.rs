//! Table Catalog - The closed set of supply-chain tables and their signatures

use crate::error::{CopilotError, Result};
use itertools::Itertools;
use polars::prelude::{DataFrame, DataType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five tables served by the gateway. The set is closed: any other name
/// is rejected before a network call is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableName {
    Clients,
    Items,
    Suppliers,
    Purchases,
    Invoices,
}

impl TableName {
    pub const ALL: [TableName; 5] = [
        TableName::Clients,
        TableName::Items,
        TableName::Suppliers,
        TableName::Purchases,
        TableName::Invoices,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::Clients => "clients",
            TableName::Items => "items",
            TableName::Suppliers => "suppliers",
            TableName::Purchases => "purchases",
            TableName::Invoices => "invoices",
        }
    }

    /// Gateway path for this table. Clients and invoices live in the orders
    /// service, the rest in the inventory service.
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            TableName::Clients => "orders_service/ai/v1/clients",
            TableName::Invoices => "orders_service/ai/v1/invoices",
            TableName::Items => "inventory/ai/v1/items",
            TableName::Purchases => "inventory/ai/v1/purchases",
            TableName::Suppliers => "inventory/ai/v1/suppliers",
        }
    }

    pub fn parse(name: &str) -> Result<TableName> {
        match name {
            "clients" => Ok(TableName::Clients),
            "items" => Ok(TableName::Items),
            "suppliers" => Ok(TableName::Suppliers),
            "purchases" => Ok(TableName::Purchases),
            "invoices" => Ok(TableName::Invoices),
            other => Err(CopilotError::UnknownTable(other.to_string())),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primitive column types the flattener can produce, inferred from the
/// materialized polars dtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    Str,
    List,
    Date,
    Null,
}

impl ColumnType {
    pub fn from_dtype(dtype: &DataType) -> ColumnType {
        match dtype {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => ColumnType::Int,
            DataType::Float32 | DataType::Float64 => ColumnType::Float,
            DataType::Boolean => ColumnType::Bool,
            DataType::String => ColumnType::Str,
            DataType::List(_) => ColumnType::List,
            DataType::Date | DataType::Datetime(_, _) => ColumnType::Date,
            DataType::Null => ColumnType::Null,
            _ => ColumnType::Str,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
            ColumnType::Str => "str",
            ColumnType::List => "list",
            ColumnType::Date => "date",
            ColumnType::Null => "null",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-table mapping of column name to inferred type, in frame column order.
/// Computed after all-null columns have been dropped, so it reflects only
/// populated columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TableSignature {
    pub columns: Vec<(String, ColumnType)>,
}

impl TableSignature {
    pub fn from_frame(frame: &DataFrame) -> TableSignature {
        let columns = frame
            .get_columns()
            .iter()
            .map(|series| (series.name().to_string(), ColumnType::from_dtype(series.dtype())))
            .collect();
        TableSignature { columns }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// One `name: type` line per column, for embedding into the system prompt.
    pub fn render(&self) -> String {
        if self.columns.is_empty() {
            return "  (no populated columns)".to_string();
        }
        self.columns
            .iter()
            .map(|(name, ty)| format!("  - {}: {}", name, ty))
            .join("\n")
    }
}

impl fmt::Display for TableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
