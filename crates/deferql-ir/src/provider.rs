//! Schema lookup for named tables

use crate::error::{Error, Result};
use crate::types::Schema;
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolves the native schema of a table the backend already holds.
pub trait SchemaProvider: Send + Sync {
    fn get_native_schema(&self, table_name: &str) -> Result<Schema>;
}

/// In-memory schema provider for tests and embedded catalogs
#[derive(Debug, Default)]
pub struct MemorySchemaProvider {
    tables: RwLock<HashMap<String, Schema>>,
}

impl MemorySchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, name: impl Into<String>, schema: Schema) {
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(name.into(), schema);
        }
    }

    pub fn with_table(self, name: impl Into<String>, schema: Schema) -> Self {
        self.add_table(name, schema);
        self
    }
}

impl SchemaProvider for MemorySchemaProvider {
    fn get_native_schema(&self, table_name: &str) -> Result<Schema> {
        let tables = self
            .tables
            .read()
            .map_err(|_| Error::Schema("schema catalog lock poisoned".to_string()))?;
        tables
            .get(table_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("table '{table_name}'")))
    }
}
