use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tracing::{debug, info};
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::locks::{LockManager, LockMode, LockSet};
use crate::core::project::ProjectCatalog;
use crate::core::table::TableContext;
use crate::core::types::{Row, RowId};
use crate::index::text_index::TextIndex;
use crate::parallel::indexer::{TextIndexer, TextJob, TextSink};
use crate::query::ast::SearchStatement;
use crate::query::definition::parse_definition;
use crate::query::parser::parse_search;
use crate::schema::schema::TableStructure;
use crate::schema::validate::coerce_value;
use crate::schema::versions::StructureStore;
use crate::search::executor::QueryEngine;
use crate::storage::file_lock::FileLock;
use crate::storage::layout::StorageLayout;
use crate::writer::cascade;
use crate::writer::mutation::MutationCoordinator;

/// Which tables a row operation locks besides the project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,    // Target and pointed tables shared
    Write,   // Target exclusive, pointed tables shared
    Delete,  // Target and every table referencing it exclusive
}

/// A record store rooted at `Config::storage_path`.
///
/// Every operation re-reads what it needs from disk under the locks described in
/// [`LockManager`]; nothing about rows or indexes is cached between calls.
pub struct Database {
    config: Config,
    storage: StorageLayout,
    catalog: ProjectCatalog,
    locks: Arc<LockManager>,
    indexer: TextIndexer,
    _file_lock: FileLock,
}

impl Database {
    pub fn open(config: Config) -> Result<Self> {
        let storage = StorageLayout::new(config.storage_path.clone())?;
        let file_lock = FileLock::acquire(&storage)?;
        let locks = Arc::new(LockManager::new());
        let indexer = TextIndexer::start(storage.clone(), locks.clone(), config.indexer_workers)?;

        info!(path = %storage.base_dir.display(), "Opened database");
        Ok(Database {
            catalog: ProjectCatalog::new(storage.clone()),
            config,
            storage,
            locks,
            indexer,
            _file_lock: file_lock,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // Projects

    pub fn create_project(&self, name: &str) -> Result<()> {
        let _locks = self.locks.projects(LockMode::Write);
        self.catalog.create(name)?;
        info!(project = name, "Created project");
        Ok(())
    }

    pub fn delete_project(&self, name: &str) -> Result<()> {
        self.indexer.wait_idle();
        let _locks = self.locks.projects(LockMode::Write);
        self.catalog.delete(name)?;
        self.locks.forget_project(name);
        info!(project = name, "Deleted project");
        Ok(())
    }

    pub fn rename_project(&self, old: &str, new: &str) -> Result<()> {
        self.indexer.wait_idle();
        {
            let _locks = self.locks.projects(LockMode::Write);
            self.catalog.rename(old, new)?;
            self.locks.forget_project(old);
        }
        // Jobs journaled after the wait moved with the directory
        let requeued = self.indexer.reconcile_project(new)?;
        info!(old, new, requeued, "Renamed project");
        Ok(())
    }

    pub fn list_projects(&self) -> Result<Vec<String>> {
        let _locks = self.locks.projects(LockMode::Read);
        self.catalog.list()
    }

    // Tables

    pub fn create_table(&self, project: &str, definition: &str) -> Result<()> {
        let structure = parse_definition(definition)?;
        let _locks = self.locks.project(project, LockMode::Write);
        self.catalog.require(project)?;

        let store = StructureStore::new(self.storage.table(project, &structure.name));
        if !store.versions()?.is_empty() {
            return Err(Error::already_exists(format!(
                "Table '{}' already exists in project '{}'", structure.name, project
            )));
        }
        self.check_pointed_tables(project, &structure)?;
        store.save(&structure)?;

        info!(project, table = %structure.name, "Created table");
        Ok(())
    }

    /// Save a new structure version unless it equals the current one.
    /// Returns the current version afterwards.
    pub fn update_table_structure(&self, project: &str, definition: &str) -> Result<u32> {
        let structure = parse_definition(definition)?;
        let _locks = self.locks.project(project, LockMode::Write);
        self.catalog.require(project)?;

        let table = TableContext::open(&self.storage, &self.config, project, &structure.name)?;
        self.check_pointed_tables(project, &structure)?;

        let (version, created) = StructureStore::new(table.layout.clone()).save(&structure)?;
        if !created {
            debug!(project, table = %table.name, version, "Table structure unchanged");
            return Ok(version);
        }
        self.migrate_indexes(&table, table.current(), &structure)?;

        info!(project, table = %table.name, version, "Table structure updated");
        Ok(version)
    }

    pub fn get_table_structure(&self, project: &str, table: &str, version: u32) -> Result<String> {
        let _locks = self.locks.project(project, LockMode::Read);
        self.catalog.require(project)?;
        let context = TableContext::open(&self.storage, &self.config, project, table)?;
        StructureStore::new(context.layout).read_text(version)
    }

    pub fn get_current_version(&self, project: &str, table: &str) -> Result<u32> {
        let _locks = self.locks.project(project, LockMode::Read);
        self.catalog.require(project)?;
        Ok(TableContext::open(&self.storage, &self.config, project, table)?.current_version)
    }

    /// Refused while another table holds a foreign key to `table`
    pub fn delete_table(&self, project: &str, table: &str) -> Result<()> {
        self.indexer.wait_idle();
        let _locks = self.locks.project(project, LockMode::Write);
        self.catalog.require(project)?;
        let context = TableContext::open(&self.storage, &self.config, project, table)?;

        for other in self.catalog.tables(project)? {
            if other == table {
                continue;
            }
            let other = TableContext::open(&self.storage, &self.config, project, &other)?;
            if let Some(fk) = other.current().foreign_keys.iter().find(|fk| fk.pointed_table == table) {
                return Err(Error::constraint(format!(
                    "Table '{}' is referenced by '{}.{}'", table, other.name, fk.field
                )));
            }
        }

        fs::remove_dir_all(&context.layout.dir)?;
        self.locks.forget_table(project, table);
        info!(project, table, "Deleted table");
        Ok(())
    }

    pub fn list_tables(&self, project: &str) -> Result<Vec<String>> {
        let _locks = self.locks.project(project, LockMode::Read);
        self.catalog.tables(project)
    }

    /// Rewrite the row segment and every field index segment of a table.
    /// Returns the bytes reclaimed.
    pub fn compact_table(&self, project: &str, table: &str) -> Result<u64> {
        let _locks = self.lock_rows(project, table, Access::Write)?;
        let context = TableContext::open(&self.storage, &self.config, project, table)?;

        let mut reclaimed = context.rows.compact()?.reclaimed();
        for (_, stats) in context.indexes.compact()? {
            reclaimed += stats.reclaimed();
        }
        info!(project, table, reclaimed, "Compacted table");
        Ok(reclaimed)
    }

    // Rows

    pub fn insert_row(&self, project: &str, table: &str, fields: &BTreeMap<String, String>) -> Result<RowId> {
        let _locks = self.lock_rows(project, table, Access::Write)?;
        self.mutations(project).insert(table, fields)
    }

    pub fn update_rows(&self, project: &str, statement: &str, set: &BTreeMap<String, String>) -> Result<usize> {
        let statement = parse_search(statement)?;
        let _locks = self.lock_rows(project, &statement.table, Access::Write)?;
        self.mutations(project).update(&statement, set)
    }

    pub fn delete_rows(&self, project: &str, statement: &str) -> Result<usize> {
        let statement = parse_search(statement)?;
        let _locks = self.lock_rows(project, &statement.table, Access::Delete)?;
        self.mutations(project).delete(&statement)
    }

    pub fn delete_fields(&self, project: &str, statement: &str, fields: &[&str]) -> Result<usize> {
        let statement = parse_search(statement)?;
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let _locks = self.lock_rows(project, &statement.table, Access::Write)?;
        self.mutations(project).delete_fields(&statement, &fields)
    }

    pub fn search(&self, project: &str, statement: &str) -> Result<Vec<Row>> {
        self.search_statement(project, &parse_search(statement)?)
    }

    /// `search` for a statement built with the `SearchStatement` builders
    pub fn search_statement(&self, project: &str, statement: &SearchStatement) -> Result<Vec<Row>> {
        let _locks = self.lock_rows(project, &statement.table, Access::Read)?;
        self.engine(project).search(statement)
    }

    pub fn search_one(&self, project: &str, statement: &str) -> Result<Row> {
        let statement = parse_search(statement)?;
        let _locks = self.lock_rows(project, &statement.table, Access::Read)?;
        self.engine(project).search_one(&statement)
    }

    pub fn count_rows(&self, project: &str, statement: &str) -> Result<usize> {
        let statement = parse_search(statement)?;
        let _locks = self.lock_rows(project, &statement.table, Access::Read)?;
        self.engine(project).count(&statement)
    }

    pub fn all_rows_count(&self, project: &str, table: &str) -> Result<usize> {
        let _locks = self.lock_rows(project, table, Access::Read)?;
        self.engine(project).all_rows_count(table)
    }

    pub fn sum_rows(&self, project: &str, statement: &str, field: &str) -> Result<f64> {
        let statement = parse_search(statement)?;
        let _locks = self.lock_rows(project, &statement.table, Access::Read)?;
        self.engine(project).sum(&statement, field)
    }

    /// Block until every queued full-text job has been applied
    pub fn wait_for_text_indexing(&self) {
        self.indexer.wait_idle();
    }

    fn engine<'a>(&'a self, project: &'a str) -> QueryEngine<'a> {
        QueryEngine::new(&self.storage, &self.config, project)
    }

    fn mutations<'a>(&'a self, project: &'a str) -> MutationCoordinator<'a> {
        MutationCoordinator::new(&self.storage, &self.config, project, &self.indexer)
    }

    /// Project read lock, then the tables `access` needs, in name order.
    /// Structure changes take the project write lock, so the table set cannot
    /// change between computing it and locking it.
    fn lock_rows(&self, project: &str, table: &str, access: Access) -> Result<LockSet> {
        let mut set = self.locks.project(project, LockMode::Read);
        self.catalog.require(project)?;
        let context = TableContext::open(&self.storage, &self.config, project, table)?;

        let mut wanted: Vec<(String, LockMode)> = QueryEngine::related_tables(&context)
            .into_iter()
            .map(|name| (name, LockMode::Read))
            .collect();
        match access {
            Access::Read => {}
            Access::Write => wanted.push((table.to_string(), LockMode::Write)),
            Access::Delete => {
                let engine = self.engine(project);
                let referrers = cascade::referrers(&engine, &self.catalog.tables(project)?)?;
                for name in cascade::delete_scope(&referrers, table) {
                    wanted.push((name, LockMode::Write));
                }
            }
        }

        let wanted: Vec<(&str, LockMode)> = wanted.iter().map(|(name, mode)| (name.as_str(), *mode)).collect();
        self.locks.add_tables(&mut set, project, &wanted);
        Ok(set)
    }

    /// Pointed tables must exist, except a table pointing at itself
    fn check_pointed_tables(&self, project: &str, structure: &TableStructure) -> Result<()> {
        for fk in &structure.foreign_keys {
            if fk.pointed_table == structure.name {
                continue;
            }
            if !self.storage.table(project, &fk.pointed_table).exists() {
                return Err(Error::validation(format!(
                    "Foreign key '{}' points at table '{}', which does not exist in project '{}'",
                    fk.field, fk.pointed_table, project
                )));
            }
        }
        Ok(())
    }

    /// Drop indexes of fields that stopped being indexed and back-fill the ones that started
    fn migrate_indexes(&self, table: &TableContext, previous: &TableStructure, next: &TableStructure) -> Result<()> {
        for def in &previous.fields {
            let kept = next.field(&def.name);
            let same_type = kept.is_some_and(|k| k.field_type == def.field_type);
            if def.is_indexed() && !(same_type && kept.is_some_and(|k| k.is_indexed())) {
                table.indexes.drop_field(def)?;
                debug!(table = %table.name, field = %def.name, "Dropped field index");
            }
            if def.is_full_text() && !kept.is_some_and(|k| k.is_full_text()) {
                TextIndex::open(&table.layout, &def.name).destroy()?;
                debug!(table = %table.name, field = %def.name, "Dropped full-text index");
            }
        }

        let mut backfill = Vec::new();
        for def in &next.fields {
            let old = previous.field(&def.name);
            let same_type = old.is_some_and(|o| o.field_type == def.field_type);
            let needs_index = def.is_indexed() && !(same_type && old.is_some_and(|o| o.is_indexed()));
            let needs_text = def.is_full_text() && !old.is_some_and(|o| o.is_full_text());
            if needs_index || needs_text {
                backfill.push(def);
            }
        }
        if backfill.is_empty() {
            return Ok(());
        }

        let mut rows = 0usize;
        for (id, range) in table.rows.locations()? {
            let row = table.rows.read_at(range)?;
            for def in &backfill {
                let Some(value) = row.get(&def.name).filter(|v| !v.is_empty()) else {
                    continue;
                };
                if def.is_full_text() {
                    self.indexer.submit(TextJob::index(&table.project, &table.name, &def.name, id, value))?;
                    continue;
                }
                // Old rows may hold values the field's new type cannot express
                match coerce_value(&def.name, def.field_type, value, self.config.max_string_length) {
                    Ok(value) => table.indexes.make_index(def, &value, id)?,
                    Err(err) => debug!(table = %table.name, field = %def.name, id = id.0, %err, "Skipped value during back-fill"),
                }
            }
            rows += 1;
        }
        info!(table = %table.name, fields = backfill.len(), rows, "Back-filled indexes");
        Ok(())
    }
}
