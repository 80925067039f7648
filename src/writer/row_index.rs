use crate::core::error::Result;
use crate::core::table::TableContext;
use crate::core::types::{Row, RowId};
use crate::parallel::indexer::{TextJob, TextSink};
use crate::schema::schema::{FieldDefinition, TableStructure};

fn value<'r>(row: &'r Row, name: &str) -> Option<&'r str> {
    row.get(name).map(String::as_str).filter(|v| !v.is_empty())
}

/// Build the field indexes of a new row and queue its text fields
pub fn index_row(
    table: &TableContext,
    structure: &TableStructure,
    id: RowId,
    row: &Row,
    sink: &dyn TextSink,
) -> Result<()> {
    table.indexes.index_row(structure, id, row)?;
    for def in structure.fields.iter().filter(|f| f.is_full_text()) {
        if let Some(text) = value(row, &def.name) {
            sink.submit(TextJob::index(&table.project, &table.name, &def.name, id, text))?;
        }
    }
    Ok(())
}

/// Remove every index entry of a row that is being deleted
pub fn unindex_row(
    table: &TableContext,
    structure: &TableStructure,
    id: RowId,
    row: &Row,
    sink: &dyn TextSink,
) -> Result<()> {
    table.indexes.unindex_row(structure, id, row)?;
    for def in structure.fields.iter().filter(|f| f.is_full_text()) {
        if value(row, &def.name).is_some() {
            sink.submit(TextJob::deindex(&table.project, &table.name, &def.name, id))?;
        }
    }
    Ok(())
}

/// Move a rewritten row's index entries from `old` to `new`.
///
/// Only fields whose value or definition changed are touched; the old row is
/// read through the structure it was written under.
pub fn reindex_row(
    table: &TableContext,
    old_structure: &TableStructure,
    old: &Row,
    new_structure: &TableStructure,
    new: &Row,
    id: RowId,
    sink: &dyn TextSink,
) -> Result<()> {
    let unchanged = |def: &FieldDefinition, other: Option<&FieldDefinition>, before: Option<&str>, after: Option<&str>| {
        other == Some(def) && before == after
    };

    for def in &old_structure.fields {
        let before = value(old, &def.name);
        let after = value(new, &def.name);
        if unchanged(def, new_structure.field(&def.name), before, after) {
            continue;
        }
        if let Some(before) = before {
            table.indexes.delete_index(def, before, id)?;
        }
        // A text value that is rewritten gets replaced by the index job below
        let still_text = after.is_some() && new_structure.field(&def.name).is_some_and(|d| d.is_full_text());
        if def.is_full_text() && before.is_some() && !still_text {
            sink.submit(TextJob::deindex(&table.project, &table.name, &def.name, id))?;
        }
    }

    for def in &new_structure.fields {
        let before = value(old, &def.name);
        let after = value(new, &def.name);
        if unchanged(def, old_structure.field(&def.name), before, after) {
            continue;
        }
        let Some(after) = after else {
            continue;
        };
        table.indexes.make_index(def, after, id)?;
        if def.is_full_text() {
            sink.submit(TextJob::index(&table.project, &table.name, &def.name, id, after))?;
        }
    }
    Ok(())
}
