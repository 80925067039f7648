use std::collections::{BTreeMap, HashMap, VecDeque};
use roaring::RoaringTreemap;
use tracing::debug;
use crate::core::error::{Error, Result};
use crate::core::types::RowId;
use crate::parallel::indexer::TextSink;
use crate::schema::schema::OnDelete;
use crate::search::executor::QueryEngine;
use crate::writer::mutation::check_writable;
use crate::writer::row_index::{reindex_row, unindex_row};

/// A foreign key seen from the table it points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referrer {
    pub table: String,
    pub field: String,
    pub on_delete: OnDelete,
}

/// Current foreign keys of `tables`, grouped by pointed table
pub fn referrers(engine: &QueryEngine, tables: &[String]) -> Result<HashMap<String, Vec<Referrer>>> {
    let mut out: HashMap<String, Vec<Referrer>> = HashMap::new();
    for name in tables {
        let table = engine.open(name)?;
        for fk in &table.current().foreign_keys {
            out.entry(fk.pointed_table.clone()).or_default().push(Referrer {
                table: name.clone(),
                field: fk.field.clone(),
                on_delete: fk.on_delete,
            });
        }
    }
    Ok(out)
}

/// Tables a delete on `root` may write: `root` and every table referencing it, transitively
pub fn delete_scope(referrers: &HashMap<String, Vec<Referrer>>, root: &str) -> Vec<String> {
    let mut scope = vec![root.to_string()];
    let mut next = 0;
    while next < scope.len() {
        for referrer in referrers.get(&scope[next]).into_iter().flatten() {
            if !scope.contains(&referrer.table) {
                scope.push(referrer.table.clone());
            }
        }
        next += 1;
    }
    scope
}

fn referencing_rows(engine: &QueryEngine, referrer: &Referrer, ids: &RoaringTreemap) -> Result<RoaringTreemap> {
    let index = engine.open(&referrer.table)?.indexes.field(&referrer.field);
    let mut out = RoaringTreemap::new();
    for id in ids.iter() {
        out |= index.ids(&id.to_string())?;
    }
    Ok(out)
}

/// Every row a delete removes or rewrites, computed and checked before anything is written
#[derive(Debug, Default)]
pub struct DeletePlan {
    pub deletions: BTreeMap<String, RoaringTreemap>,
    /// Referencing rows whose foreign-key fields are cleared
    pub clears: BTreeMap<String, BTreeMap<RowId, Vec<String>>>,
}

impl DeletePlan {
    pub fn build(
        engine: &QueryEngine,
        referrers: &HashMap<String, Vec<Referrer>>,
        root: &str,
        ids: RoaringTreemap,
    ) -> Result<Self> {
        let mut plan = DeletePlan::default();
        let references = |table: &str| referrers.get(table).into_iter().flatten();

        // Follow cascading deletes to the full set of doomed rows
        plan.deletions.insert(root.to_string(), ids.clone());
        let mut queue = VecDeque::from([(root.to_string(), ids)]);
        while let Some((table, ids)) = queue.pop_front() {
            for referrer in references(&table).filter(|r| r.on_delete == OnDelete::Delete) {
                let found = referencing_rows(engine, referrer, &ids)?;
                let fresh = match plan.deletions.get(&referrer.table) {
                    Some(planned) => &found - planned,
                    None => found,
                };
                // Tables without doomed rows stay out of the plan
                if fresh.is_empty() {
                    continue;
                }
                *plan.deletions.entry(referrer.table.clone()).or_default() |= &fresh;
                queue.push_back((referrer.table.clone(), fresh));
            }
        }

        // Restrict and empty apply to referencing rows that survive the delete
        for (table, ids) in &plan.deletions {
            for referrer in references(table) {
                let found = referencing_rows(engine, referrer, ids)?;
                let surviving = match plan.deletions.get(&referrer.table) {
                    Some(doomed) => &found - doomed,
                    None => found,
                };
                if surviving.is_empty() {
                    continue;
                }

                match referrer.on_delete {
                    OnDelete::Delete => {}
                    OnDelete::Restrict => {
                        return Err(Error::constraint(format!(
                            "Cannot delete from table '{}': {} row(s) of table '{}' reference it through '{}'",
                            table, surviving.len(), referrer.table, referrer.field
                        )));
                    }
                    OnDelete::Empty => {
                        let context = engine.open(&referrer.table)?;
                        if context.current().field(&referrer.field).is_some_and(|f| f.required) {
                            return Err(Error::constraint(format!(
                                "Cannot empty required field '{}' of table '{}' referencing deleted rows of '{}'",
                                referrer.field, referrer.table, table
                            )));
                        }
                        let clears = plan.clears.entry(referrer.table.clone()).or_default();
                        for id in surviving.iter() {
                            clears.entry(RowId(id)).or_default().push(referrer.field.clone());
                        }
                    }
                }
            }
        }

        for table in plan.deletions.keys().chain(plan.clears.keys()) {
            check_writable(&engine.open(table)?, "deleted from")?;
        }
        Ok(plan)
    }

    /// Rows removed from the table the delete was issued against
    pub fn root_count(&self, root: &str) -> usize {
        self.deletions.get(root).map_or(0, |ids| ids.len() as usize)
    }

    pub fn apply(&self, engine: &QueryEngine, sink: &dyn TextSink) -> Result<()> {
        for (name, rows) in &self.clears {
            let table = engine.open(name)?;
            for (id, fields) in rows {
                let Some(old) = table.rows.read(*id)? else {
                    continue;
                };
                let mut new = old.clone();
                for field in fields {
                    new.remove(field);
                }
                // The row keeps its version; only the cleared fields change
                let structure = table.structure_of(&old)?;
                reindex_row(&table, structure, &old, structure, &new, *id, sink)?;
                table.rows.write(*id, &new)?;
            }
            debug!(table = %name, rows = rows.len(), "Emptied referencing fields");
        }

        for (name, ids) in &self.deletions {
            let table = engine.open(name)?;
            let locations = table.rows.locations()?;
            for id in ids.iter().map(RowId) {
                let Some(range) = locations.get(&id) else {
                    continue;
                };
                let row = table.rows.read_at(*range)?;
                unindex_row(&table, table.structure_of(&row)?, id, &row, sink)?;
                table.rows.delete(id)?;
            }
            debug!(table = %name, rows = ids.len(), "Deleted rows");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn referrer(table: &str, on_delete: OnDelete) -> Referrer {
        Referrer { table: table.to_string(), field: "parent".to_string(), on_delete }
    }

    #[test]
    fn scope_follows_references_transitively() {
        let mut graph = HashMap::new();
        graph.insert("a".to_string(), vec![referrer("b", OnDelete::Delete), referrer("c", OnDelete::Restrict)]);
        graph.insert("b".to_string(), vec![referrer("d", OnDelete::Empty), referrer("a", OnDelete::Delete)]);
        graph.insert("x".to_string(), vec![referrer("y", OnDelete::Delete)]);

        assert_eq!(delete_scope(&graph, "a"), vec!["a", "b", "c", "d"]);
        assert_eq!(delete_scope(&graph, "c"), vec!["c"]);
    }
}
