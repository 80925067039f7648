use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use roaring::RoaringTreemap;
use crate::core::error::{Error, Result};
use crate::core::types::{Row, RowId};
use crate::storage::layout::TableLayout;
use crate::storage::segment::{CompactionStats, OffsetRange, SegmentStore};

/// Row records of one table on top of a segment store keyed by row id.
///
/// Records are `bincode(Row)` compressed with LZ4 (size-prefixed).
pub struct RowStore {
    pub segment: SegmentStore,
    pub last_id_path: PathBuf,
}

impl RowStore {
    pub fn open(table: &TableLayout, zero_fill: bool) -> Self {
        RowStore {
            segment: SegmentStore::open(table.data_segment()).with_zero_fill(zero_fill),
            last_id_path: table.last_id_path(),
        }
    }

    /// Write (or rewrite) a full record
    pub fn write(&self, id: RowId, row: &Row) -> Result<()> {
        let data = bincode::serialize(row)?;
        let compressed = lz4_flex::compress_prepend_size(&data);
        self.segment.put(&id.to_string(), &compressed)?;
        Ok(())
    }

    pub fn read(&self, id: RowId) -> Result<Option<Row>> {
        match self.segment.lookup(&id.to_string())? {
            Some(range) => Ok(Some(self.read_at(range)?)),
            None => Ok(None),
        }
    }

    pub fn read_at(&self, range: OffsetRange) -> Result<Row> {
        let compressed = self.segment.read(range)?;
        let data = lz4_flex::decompress_size_prepended(&compressed)?;
        Ok(bincode::deserialize(&data)?)
    }

    pub fn contains(&self, id: RowId) -> Result<bool> {
        Ok(self.segment.lookup(&id.to_string())?.is_some())
    }

    /// Live row locations, resolved once so a result set can be read without rescanning
    pub fn locations(&self) -> Result<HashMap<RowId, OffsetRange>> {
        let mut out = HashMap::new();
        for (key, range) in self.segment.resolve()? {
            let id = key.parse::<u64>()
                .map_err(|_| Error::storage(format!("Invalid row key '{}' in data segment", key)))?;
            out.insert(RowId(id), range);
        }
        Ok(out)
    }

    pub fn live_ids(&self) -> Result<RoaringTreemap> {
        Ok(self.locations()?.keys().map(|id| id.0).collect())
    }

    pub fn delete(&self, id: RowId) -> Result<bool> {
        self.segment.delete(&id.to_string())
    }

    pub fn last_id(&self) -> Result<u64> {
        match fs::read_to_string(&self.last_id_path) {
            Ok(text) => text.trim().parse::<u64>()
                .map_err(|_| Error::storage(format!("Corrupt id counter {}", self.last_id_path.display()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Next id from the persisted counter. Ids are never reused, even after deletes.
    pub fn next_id(&self) -> Result<RowId> {
        Ok(RowId(self.last_id()? + 1))
    }

    pub fn store_last_id(&self, id: RowId) -> Result<()> {
        fs::write(&self.last_id_path, id.to_string())?;
        Ok(())
    }

    pub fn compact(&self) -> Result<CompactionStats> {
        self.segment.compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RowExt;
    use crate::storage::layout::StorageLayout;
    use tempfile::TempDir;

    fn row(id: u64, name: &str) -> Row {
        Row::from([
            ("id".to_string(), id.to_string()),
            ("_version".to_string(), "1".to_string()),
            ("name".to_string(), name.to_string()),
        ])
    }

    #[test]
    fn rows_round_trip_and_rewrite_in_place() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let table = layout.table("p", "t");
        fs::create_dir_all(&table.dir).unwrap();
        let rows = RowStore::open(&table, true);

        rows.write(RowId(1), &row(1, "ada")).unwrap();
        rows.write(RowId(2), &row(2, "bob")).unwrap();
        rows.write(RowId(1), &row(1, "ada lovelace")).unwrap();

        let first = rows.read(RowId(1)).unwrap().unwrap();
        assert_eq!(first["name"], "ada lovelace");
        assert_eq!(first.row_id().unwrap(), RowId(1));
        assert_eq!(rows.live_ids().unwrap().len(), 2);

        assert!(rows.delete(RowId(2)).unwrap());
        assert!(!rows.contains(RowId(2)).unwrap());
        assert_eq!(rows.live_ids().unwrap().iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn id_counter_starts_at_one() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let table = layout.table("p", "t");
        fs::create_dir_all(&table.dir).unwrap();
        let rows = RowStore::open(&table, true);

        assert_eq!(rows.next_id().unwrap(), RowId(1));
        rows.store_last_id(RowId(41)).unwrap();
        assert_eq!(rows.next_id().unwrap(), RowId(42));
    }
}
