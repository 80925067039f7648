use std::cmp::Ordering;
use std::fs;
use std::io;
use roaring::RoaringTreemap;
use tracing::debug;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Row, RowId};
use crate::index::comparable::Comparable;
use crate::index::like_index::LikeIndex;
use crate::index::posting::{decode_ids, encode_ids};
use crate::query::ast::Relation;
use crate::schema::schema::{DateComponent, FieldDefinition, FieldType, TableStructure};
use crate::storage::layout::TableLayout;
use crate::storage::segment::{CompactionStats, SegmentStore};

/// Value -> id-list index of one field, stored in `{field}_indexes.flaa1/.flaa2`.
///
/// Keys are field values; the bytes are the comma-joined ids of the rows holding
/// that value. A value whose list becomes empty is tombstoned.
pub struct FieldIndex {
    pub segment: SegmentStore,
}

impl FieldIndex {
    pub fn ids(&self, value: &str) -> Result<RoaringTreemap> {
        match self.segment.get(value)? {
            Some(bytes) => decode_ids(&bytes),
            None => Ok(RoaringTreemap::new()),
        }
    }

    pub fn insert(&self, value: &str, id: RowId) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        let mut ids = self.ids(value)?;
        if ids.insert(id.0) {
            self.segment.put(value, encode_ids(&ids).as_bytes())?;
        }
        Ok(())
    }

    pub fn remove(&self, value: &str, id: RowId) -> Result<()> {
        let mut ids = self.ids(value)?;
        if !ids.remove(id.0) {
            return Ok(());
        }
        if ids.is_empty() {
            self.segment.delete(value)?;
        } else {
            self.segment.put(value, encode_ids(&ids).as_bytes())?;
        }
        Ok(())
    }

    /// Every live `(value, ids)` pair
    pub fn entries(&self) -> Result<Vec<(String, RoaringTreemap)>> {
        let mut out = Vec::new();
        for (value, range) in self.segment.resolve()? {
            let ids = decode_ids(&self.segment.read(range)?)?;
            out.push((value, ids));
        }
        Ok(out)
    }

    /// Rows holding any value
    pub fn all_ids(&self) -> Result<RoaringTreemap> {
        let mut all = RoaringTreemap::new();
        for (_, ids) in self.entries()? {
            all |= ids;
        }
        Ok(all)
    }

    /// Rows whose value compares to `bound` per `relation` (`>`, `>=`, `<`, `<=`),
    /// comparing as `value_type`. Keys are converted and sorted once per call.
    pub fn range(&self, value_type: FieldType, relation: Relation, bound: &str) -> Result<RoaringTreemap> {
        let bound = Comparable::parse(value_type, bound).ok_or_else(|| {
            Error::validation(format!("'{}' is not a valid {} bound", bound, value_type))
        })?;

        let mut keys: Vec<(Comparable, RoaringTreemap)> = self.entries()?
            .into_iter()
            .filter_map(|(value, ids)| Comparable::parse(value_type, &value).map(|c| (c, ids)))
            .collect();
        keys.sort_by(|a, b| a.0.compare(&b.0).unwrap_or(Ordering::Equal));

        let less = |c: &Comparable| c.compare(&bound) == Some(Ordering::Less);
        let not_greater = |c: &Comparable| c.compare(&bound) != Some(Ordering::Greater);
        let selected = match relation {
            Relation::Gt => &keys[keys.partition_point(|(c, _)| not_greater(c))..],
            Relation::Gte => &keys[keys.partition_point(|(c, _)| less(c))..],
            Relation::Lt => &keys[..keys.partition_point(|(c, _)| less(c))],
            Relation::Lte => &keys[..keys.partition_point(|(c, _)| not_greater(c))],
            other => {
                return Err(Error::new(ErrorKind::Internal, format!("'{}' is not a range relation", other)));
            }
        };

        let mut out = RoaringTreemap::new();
        for (_, ids) in selected {
            out |= ids;
        }
        Ok(out)
    }

    pub fn compact(&self) -> Result<CompactionStats> {
        self.segment.compact()
    }

    pub fn destroy(&self) -> Result<()> {
        self.segment.destroy()
    }
}

/// Field, derived-date and `like` indexes of one table
#[derive(Debug, Clone)]
pub struct FieldIndexManager {
    pub table: TableLayout,
    pub zero_fill: bool,
}

impl FieldIndexManager {
    pub fn new(table: TableLayout, zero_fill: bool) -> Self {
        FieldIndexManager { table, zero_fill }
    }

    pub fn field(&self, name: &str) -> FieldIndex {
        FieldIndex {
            segment: SegmentStore::open(self.table.field_segment(name)).with_zero_fill(self.zero_fill),
        }
    }

    pub fn like_index(&self, name: &str) -> LikeIndex {
        LikeIndex::open(self.table.like_dir(name))
    }

    pub fn lookup(&self, field: &str, value: &str) -> Result<RoaringTreemap> {
        self.field(field).ids(value)
    }

    /// Add `id` under `value`, fanning dates out into their component indexes
    pub fn make_index(&self, def: &FieldDefinition, value: &str, id: RowId) -> Result<()> {
        if !def.is_indexed() || value.is_empty() {
            return Ok(());
        }

        self.field(&def.name).insert(value, id)?;
        for component in DateComponent::for_type(def.field_type) {
            if let Some(part) = component.extract(def.field_type, value) {
                self.field(&component.field_name(&def.name)).insert(&part, id)?;
            }
        }
        if def.has_like_index() {
            self.like_index(&def.name).insert(value, id)?;
        }
        Ok(())
    }

    /// Remove `id` from `value`; derived date indexes first
    pub fn delete_index(&self, def: &FieldDefinition, value: &str, id: RowId) -> Result<()> {
        if !def.is_indexed() || value.is_empty() {
            return Ok(());
        }

        for component in DateComponent::for_type(def.field_type) {
            if let Some(part) = component.extract(def.field_type, value) {
                self.field(&component.field_name(&def.name)).remove(&part, id)?;
            }
        }
        if def.has_like_index() {
            self.like_index(&def.name).remove(value, id)?;
        }
        self.field(&def.name).remove(value, id)
    }

    /// Index every indexed field of `row`, read through `structure` (the row's version)
    pub fn index_row(&self, structure: &TableStructure, id: RowId, row: &Row) -> Result<()> {
        for def in &structure.fields {
            if let Some(value) = row.get(&def.name) {
                self.make_index(def, value, id)?;
            }
        }
        Ok(())
    }

    pub fn unindex_row(&self, structure: &TableStructure, id: RowId, row: &Row) -> Result<()> {
        for def in &structure.fields {
            if let Some(value) = row.get(&def.name) {
                self.delete_index(def, value, id)?;
            }
        }
        Ok(())
    }

    /// Delete every index file of a field
    pub fn drop_field(&self, def: &FieldDefinition) -> Result<()> {
        for component in DateComponent::for_type(def.field_type) {
            self.field(&component.field_name(&def.name)).destroy()?;
        }
        self.like_index(&def.name).destroy()?;
        self.field(&def.name).destroy()
    }

    /// Compact every field index segment present on disk
    pub fn compact(&self) -> Result<Vec<(String, CompactionStats)>> {
        let entries = match fs::read_dir(&self.table.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            if let Some(field) = name.to_str().and_then(|n| n.strip_suffix("_indexes.flaa1")) {
                names.push(field.to_string());
            }
        }
        names.sort();

        let mut out = Vec::new();
        for name in names {
            let stats = self.field(&name).compact()?;
            debug!(field = %name, reclaimed = stats.reclaimed(), "Compacted field index");
            out.push((name, stats));
        }
        Ok(out)
    }
}
