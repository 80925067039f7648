use std::collections::HashMap;
use rayon::prelude::*;
use roaring::RoaringTreemap;
use tracing::{debug, warn};
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::table::TableContext;
use crate::core::types::{Row, RowId, ID_FIELD};
use crate::query::ast::{SearchStatement, WhereClause};
use crate::query::planner::{LogicalPlan, QueryPlanner};
use crate::search::filter::ClauseFilter;
use crate::search::results;
use crate::storage::layout::StorageLayout;
use crate::storage::segment::OffsetRange;

/// Runs search statements against one project.
///
/// Callers hold read locks on the statement's table and every table its
/// foreign keys point at (see [`QueryEngine::related_tables`]).
pub struct QueryEngine<'a> {
    storage: &'a StorageLayout,
    config: &'a Config,
    project: &'a str,
}

impl<'a> QueryEngine<'a> {
    pub fn new(storage: &'a StorageLayout, config: &'a Config, project: &'a str) -> Self {
        QueryEngine { storage, config, project }
    }

    pub fn open(&self, table: &str) -> Result<TableContext> {
        TableContext::open(self.storage, self.config, self.project, table)
    }

    /// The table itself plus every table its current foreign keys point at
    pub fn related_tables(table: &TableContext) -> Vec<String> {
        let mut tables = vec![table.name.clone()];
        for fk in &table.current().foreign_keys {
            if !tables.contains(&fk.pointed_table) {
                tables.push(fk.pointed_table.clone());
            }
        }
        tables
    }

    /// Ids matching the where-clauses, or every live id when there are none
    pub fn candidates(&self, table: &TableContext, clauses: &[WhereClause]) -> Result<RoaringTreemap> {
        let plan = QueryPlanner::plan(clauses);
        let filter = ClauseFilter::new(table);
        self.execute_plan(table, &filter, &plan)
    }

    fn execute_plan(&self, table: &TableContext, filter: &ClauseFilter, plan: &LogicalPlan) -> Result<RoaringTreemap> {
        match plan {
            LogicalPlan::Scan => filter.live_ids(),
            LogicalPlan::Clause(clause) => self.evaluate_clause(table, filter, clause),
            LogicalPlan::Intersection { inputs } => {
                let mut acc: Option<RoaringTreemap> = None;
                for input in inputs {
                    let ids = self.execute_plan(table, filter, input)?;
                    let next = match acc {
                        Some(acc) => acc & ids,
                        None => ids,
                    };
                    if next.is_empty() {
                        return Ok(next);
                    }
                    acc = Some(next);
                }
                Ok(acc.unwrap_or_default())
            }
            LogicalPlan::Union { inputs } => {
                let mut acc = RoaringTreemap::new();
                for input in inputs {
                    acc |= self.execute_plan(table, filter, input)?;
                }
                Ok(acc)
            }
        }
    }

    fn evaluate_clause(&self, table: &TableContext, filter: &ClauseFilter, clause: &WhereClause) -> Result<RoaringTreemap> {
        let Some((fk_field, field)) = clause.foreign_path() else {
            return filter.evaluate(&clause.field, clause.relation, &clause.values);
        };

        let fk = table.current().foreign_key(fk_field).ok_or_else(|| {
            Error::validation(format!(
                "'{}' is not a foreign key of table '{}' (in clause on '{}')", fk_field, table.name, clause.field
            ))
        })?;

        // Match in the pointed table, then map back through the foreign-key index
        let pointed = self.open(&fk.pointed_table)?;
        let pointed_ids = ClauseFilter::new(&pointed).evaluate(field, clause.relation, &clause.values)?;

        let fk_index = table.indexes.field(fk_field);
        let mut ids = RoaringTreemap::new();
        for pointed_id in pointed_ids.iter() {
            ids |= fk_index.ids(&pointed_id.to_string())?;
        }
        Ok(ids)
    }

    pub fn search(&self, statement: &SearchStatement) -> Result<Vec<Row>> {
        let table = self.open(&statement.table)?;
        self.search_in(&table, statement)
    }

    /// Filter, read, expand, order, paginate, project, de-duplicate
    pub fn search_in(&self, table: &TableContext, statement: &SearchStatement) -> Result<Vec<Row>> {
        let ids = self.candidates(table, &statement.where_clauses)?;
        let mut rows = read_rows(table, &ids)?;

        if statement.expand {
            rows = self.expand(table, rows)?;
        }
        results::order(table, &mut rows, statement.order_by.as_ref());
        let rows = results::paginate(rows, statement.start_index, statement.limit);
        let rows = results::project(rows, &statement.fields);
        let rows = if statement.distinct { results::distinct(rows) } else { rows };

        debug!(project = self.project, table = %table.name, matched = ids.len(), returned = rows.len(), "search");
        Ok(rows)
    }

    pub fn search_one(&self, statement: &SearchStatement) -> Result<Row> {
        self.search(statement)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("No row of table '{}' matches the statement", statement.table)))
    }

    pub fn count(&self, statement: &SearchStatement) -> Result<usize> {
        let table = self.open(&statement.table)?;
        let shapes_result = statement.distinct
            || statement.expand
            || statement.start_index > 0
            || statement.limit.is_some();
        if shapes_result {
            return Ok(self.search_in(&table, statement)?.len());
        }
        Ok(self.candidates(&table, &statement.where_clauses)?.len() as usize)
    }

    pub fn all_rows_count(&self, table: &str) -> Result<usize> {
        Ok(self.open(table)?.rows.live_ids()?.len() as usize)
    }

    /// Sum of a numeric field over the matching rows; empty values count as zero
    pub fn sum(&self, statement: &SearchStatement, field: &str) -> Result<f64> {
        let table = self.open(&statement.table)?;
        let numeric = table
            .current()
            .resolve_field(field)
            .is_some_and(|f| f.value_type().is_numeric());
        if !numeric {
            return Err(Error::validation(format!(
                "Field '{}' of table '{}' is not an int or float field", field, table.name
            )));
        }

        let mut total = 0.0;
        for row in self.search_in(&table, statement)? {
            if let Some(value) = row.get(field).filter(|v| !v.is_empty()) {
                total += value.parse::<f64>().map_err(|_| {
                    Error::storage(format!("Row {} holds a non-numeric '{}': {}", row.get(ID_FIELD).map_or("?", String::as_str), field, value))
                })?;
            }
        }
        Ok(total)
    }

    /// Merge each pointed row under `{fk_field}.` prefixes
    fn expand(&self, table: &TableContext, mut rows: Vec<Row>) -> Result<Vec<Row>> {
        let foreign_keys = &table.current().foreign_keys;
        let mut pointed: Vec<(&str, TableContext, HashMap<RowId, OffsetRange>)> = Vec::new();
        for fk in foreign_keys {
            let context = self.open(&fk.pointed_table)?;
            let locations = context.rows.locations()?;
            pointed.push((fk.field.as_str(), context, locations));
        }

        for row in rows.iter_mut() {
            for (field, context, locations) in &pointed {
                let Some(id) = row.get(*field).and_then(|v| v.parse::<u64>().ok()) else {
                    continue;
                };
                let Some(range) = locations.get(&RowId(id)) else {
                    continue;
                };
                let parent = context.rows.read_at(*range)?;
                for (name, value) in parent {
                    row.insert(format!("{}.{}", field, name), value);
                }
            }
        }
        Ok(rows)
    }
}

/// Read rows in id order; ids without a data record are skipped
pub fn read_rows(table: &TableContext, ids: &RoaringTreemap) -> Result<Vec<Row>> {
    let locations = table.rows.locations()?;
    let ranges: Vec<OffsetRange> = ids
        .iter()
        .filter_map(|id| {
            let range = locations.get(&RowId(id)).copied();
            if range.is_none() {
                warn!(table = %table.name, id, "Index references a row without data");
            }
            range
        })
        .collect();

    ranges.par_iter().map(|range| table.rows.read_at(*range)).collect()
}
