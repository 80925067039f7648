use std::collections::BTreeMap;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::{Row, RowExt};
use crate::index::field_index::FieldIndexManager;
use crate::schema::schema::TableStructure;
use crate::schema::versions::StructureStore;
use crate::storage::layout::{StorageLayout, TableLayout};
use crate::storage::row_store::RowStore;

/// Everything one operation needs about a table, loaded fresh from disk
pub struct TableContext {
    pub project: String,
    pub name: String,
    pub layout: TableLayout,
    pub structures: BTreeMap<u32, TableStructure>,
    pub current_version: u32,
    pub rows: RowStore,
    pub indexes: FieldIndexManager,
}

impl TableContext {
    pub fn open(storage: &StorageLayout, config: &Config, project: &str, name: &str) -> Result<Self> {
        let layout = storage.table(project, name);
        if !layout.exists() {
            return Err(Error::not_found(format!("Table '{}' does not exist in project '{}'", name, project)));
        }

        let structures = StructureStore::new(layout.clone()).all()?;
        let current_version = structures.keys().next_back().copied().ok_or_else(|| {
            Error::not_found(format!("Table '{}' in project '{}' has no structure", name, project))
        })?;

        Ok(TableContext {
            project: project.to_string(),
            name: name.to_string(),
            rows: RowStore::open(&layout, config.zero_fill_deletes),
            indexes: FieldIndexManager::new(layout.clone(), config.zero_fill_deletes),
            layout,
            structures,
            current_version,
        })
    }

    pub fn current(&self) -> &TableStructure {
        // `open` guarantees the current version is present
        &self.structures[&self.current_version]
    }

    pub fn structure(&self, version: u32) -> Result<&TableStructure> {
        self.structures.get(&version).ok_or_else(|| {
            Error::not_found(format!("Table '{}' has no structure version {}", self.name, version))
        })
    }

    /// Structure version a row was written under
    pub fn structure_of(&self, row: &Row) -> Result<&TableStructure> {
        self.structure(row.row_version()?)
    }
}
