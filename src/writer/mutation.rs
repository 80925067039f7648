use std::collections::{BTreeMap, HashMap};
use roaring::RoaringTreemap;
use tracing::debug;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::project::ProjectCatalog;
use crate::core::table::TableContext;
use crate::core::types::{Row, RowExt, RowId, ID_FIELD, VERSION_FIELD};
use crate::parallel::indexer::TextSink;
use crate::query::ast::SearchStatement;
use crate::schema::schema::{TableStructure, TableType};
use crate::schema::validate::validate_fields;
use crate::search::executor::QueryEngine;
use crate::storage::layout::StorageLayout;
use crate::writer::cascade::{self, DeletePlan};
use crate::writer::row_index::{index_row, reindex_row};

/// Logs tables only ever grow
pub fn check_writable(table: &TableContext, action: &str) -> Result<()> {
    if table.current().table_type == TableType::Logs {
        return Err(Error::validation(format!(
            "Table '{}' is a logs table; rows cannot be {}", table.name, action
        )));
    }
    Ok(())
}

/// Validates and applies inserts, updates and deletes of one project.
///
/// Callers hold write locks on every table a mutation may touch: the target, its
/// referencing tables for deletes, and read locks on the tables its foreign keys point at.
pub struct MutationCoordinator<'a> {
    storage: &'a StorageLayout,
    config: &'a Config,
    project: &'a str,
    sink: &'a dyn TextSink,
}

impl<'a> MutationCoordinator<'a> {
    pub fn new(storage: &'a StorageLayout, config: &'a Config, project: &'a str, sink: &'a dyn TextSink) -> Self {
        MutationCoordinator { storage, config, project, sink }
    }

    fn engine(&self) -> QueryEngine<'a> {
        QueryEngine::new(self.storage, self.config, self.project)
    }

    pub fn insert(&self, table: &str, fields: &BTreeMap<String, String>) -> Result<RowId> {
        let table = self.engine().open(table)?;
        let structure = table.current();

        let mut row = validate_fields(structure, fields, self.config.max_string_length)?;
        check_unique(&table, structure, &row, None, &mut HashMap::new())?;
        ForeignKeyCheck::open(&self.engine(), structure)?.check(&row)?;

        let id = table.rows.next_id()?;
        row.insert(ID_FIELD.to_string(), id.to_string());
        row.insert(VERSION_FIELD.to_string(), table.current_version.to_string());

        table.rows.write(id, &row)?;
        index_row(&table, structure, id, &row, self.sink)?;
        table.rows.store_last_id(id)?;

        debug!(project = self.project, table = %table.name, id = id.0, "Inserted row");
        Ok(id)
    }

    /// Merge `set` into every selected row. Empty values clear a field.
    pub fn update(&self, statement: &SearchStatement, set: &BTreeMap<String, String>) -> Result<usize> {
        let table = self.engine().open(&statement.table)?;
        check_writable(&table, "updated")?;
        let structure = table.current();
        let foreign_keys = ForeignKeyCheck::open(&self.engine(), structure)?;

        // Validate every row before the first write
        let mut claims = HashMap::new();
        let mut staged = Vec::new();
        for old in self.select(&table, statement)? {
            let id = old.row_id()?;
            let mut merged: BTreeMap<String, String> = old
                .iter()
                .filter(|(name, _)| structure.field(name).is_some())
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            for (name, value) in set {
                merged.insert(name.clone(), value.clone());
            }

            let mut new = validate_fields(structure, &merged, self.config.max_string_length)?;
            check_unique(&table, structure, &new, Some(id), &mut claims)?;
            foreign_keys.check(&new)?;
            new.insert(ID_FIELD.to_string(), id.to_string());
            new.insert(VERSION_FIELD.to_string(), table.current_version.to_string());
            staged.push((id, old, new));
        }

        for (id, old, new) in &staged {
            if old == new {
                continue;
            }
            reindex_row(&table, table.structure_of(old)?, old, structure, new, *id, self.sink)?;
            table.rows.write(*id, new)?;
        }

        debug!(project = self.project, table = %table.name, rows = staged.len(), "Updated rows");
        Ok(staged.len())
    }

    /// Clear `fields` on every selected row
    pub fn delete_fields(&self, statement: &SearchStatement, fields: &[String]) -> Result<usize> {
        let table = self.engine().open(&statement.table)?;
        for field in fields {
            if table.current().field(field).is_none() {
                return Err(Error::validation(format!("Table '{}' has no field '{}'", table.name, field)));
            }
        }
        let set: BTreeMap<String, String> = fields.iter().map(|f| (f.clone(), String::new())).collect();
        self.update(statement, &set)
    }

    /// Delete the selected rows and cascade through referencing tables
    pub fn delete(&self, statement: &SearchStatement) -> Result<usize> {
        let engine = self.engine();
        let table = engine.open(&statement.table)?;
        check_writable(&table, "deleted")?;

        let mut ids = RoaringTreemap::new();
        for row in self.select(&table, statement)? {
            ids.insert(row.row_id()?.0);
        }
        if ids.is_empty() {
            return Ok(0);
        }

        let tables = ProjectCatalog::new(self.storage.clone()).tables(self.project)?;
        let referrers = cascade::referrers(&engine, &tables)?;
        let plan = DeletePlan::build(&engine, &referrers, &table.name, ids)?;
        plan.apply(&engine, self.sink)?;

        let deleted = plan.root_count(&table.name);
        debug!(project = self.project, table = %table.name, rows = deleted, cascaded_tables = plan.deletions.len() - 1, "Deleted rows");
        Ok(deleted)
    }

    /// Full rows a statement selects, ignoring projection, expand and distinct
    fn select(&self, table: &TableContext, statement: &SearchStatement) -> Result<Vec<Row>> {
        let selector = SearchStatement {
            fields: Vec::new(),
            expand: false,
            distinct: false,
            ..statement.clone()
        };
        self.engine().search_in(table, &selector)
    }
}

/// Pointed tables of a structure's foreign keys, opened once per mutation
struct ForeignKeyCheck {
    pointed: Vec<(String, TableContext)>,
}

impl ForeignKeyCheck {
    fn open(engine: &QueryEngine, structure: &TableStructure) -> Result<Self> {
        let mut pointed = Vec::with_capacity(structure.foreign_keys.len());
        for fk in &structure.foreign_keys {
            pointed.push((fk.field.clone(), engine.open(&fk.pointed_table)?));
        }
        Ok(ForeignKeyCheck { pointed })
    }

    fn check(&self, row: &BTreeMap<String, String>) -> Result<()> {
        for (field, table) in &self.pointed {
            let Some(value) = row.get(field) else {
                continue;
            };
            let exists = match value.parse::<u64>() {
                Ok(id) => table.rows.contains(RowId(id))?,
                Err(_) => false,
            };
            if !exists {
                return Err(Error::constraint(format!(
                    "Field '{}' references row {} of table '{}', which does not exist", field, value, table.name
                )));
            }
        }
        Ok(())
    }
}

/// Reject values already held by another row, or claimed earlier in the same batch
fn check_unique(
    table: &TableContext,
    structure: &TableStructure,
    row: &BTreeMap<String, String>,
    own: Option<RowId>,
    claims: &mut HashMap<String, RowId>,
) -> Result<()> {
    let mut claim = |key: String, id: Option<RowId>, what: &str| -> Result<()> {
        let Some(id) = id else {
            return Ok(());
        };
        match claims.insert(key, id) {
            Some(other) if other != id => Err(Error::constraint(format!(
                "Two updated rows would share {} in table '{}'", what, table.name
            ))),
            _ => Ok(()),
        }
    };

    for def in structure.fields.iter().filter(|f| f.unique) {
        let Some(value) = row.get(&def.name) else {
            continue;
        };
        let mut holders = table.indexes.lookup(&def.name, value)?;
        if let Some(own) = own {
            holders.remove(own.0);
        }
        if !holders.is_empty() {
            return Err(Error::constraint(format!(
                "Value '{}' of unique field '{}' already exists in table '{}'", value, def.name, table.name
            )));
        }
        claim(format!("{}\0{}", def.name, value), own, &format!("the value of '{}'", def.name))?;
    }

    for group in &structure.unique_groups {
        // Groups with an absent member never collide
        let values: Option<Vec<&String>> = group.iter().map(|name| row.get(name)).collect();
        let Some(values) = values else {
            continue;
        };

        let mut holders: Option<RoaringTreemap> = None;
        for (name, value) in group.iter().zip(&values) {
            let ids = table.indexes.lookup(name, value)?;
            holders = Some(match holders {
                Some(acc) => acc & ids,
                None => ids,
            });
        }
        let mut holders = holders.unwrap_or_default();
        if let Some(own) = own {
            holders.remove(own.0);
        }
        if !holders.is_empty() {
            return Err(Error::constraint(format!(
                "Combination of ({}) already exists in table '{}'", group.join(", "), table.name
            )));
        }

        let key = group.iter().zip(&values).map(|(n, v)| format!("{}\0{}", n, v)).collect::<Vec<_>>().join("\0");
        claim(key, own, &format!("the values of ({})", group.join(", ")))?;
    }
    Ok(())
}
