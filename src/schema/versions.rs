use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use tempfile::NamedTempFile;
use crate::core::error::{Error, Result};
use crate::query::definition::parse_definition;
use crate::schema::schema::TableStructure;
use crate::storage::layout::TableLayout;

/// Versioned `structure{N}.txt` files of a table. Versions are never deleted.
pub struct StructureStore {
    table: TableLayout,
}

impl StructureStore {
    pub fn new(table: TableLayout) -> Self {
        StructureStore { table }
    }

    pub fn versions(&self) -> Result<Vec<u32>> {
        let entries = match fs::read_dir(&self.table.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(version) = name.strip_prefix("structure")
                .and_then(|rest| rest.strip_suffix(".txt"))
                .and_then(|n| n.parse::<u32>().ok())
            {
                versions.push(version);
            }
        }

        versions.sort_unstable();
        Ok(versions)
    }

    pub fn current_version(&self) -> Result<u32> {
        self.versions()?
            .last()
            .copied()
            .ok_or_else(|| Error::not_found(format!("Table at {} has no structure", self.table.dir.display())))
    }

    pub fn read_text(&self, version: u32) -> Result<String> {
        match fs::read_to_string(self.table.structure_path(version)) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::not_found(format!("Structure version {} does not exist", version)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn read(&self, version: u32) -> Result<TableStructure> {
        parse_definition(&self.read_text(version)?)
    }

    pub fn all(&self) -> Result<BTreeMap<u32, TableStructure>> {
        let mut out = BTreeMap::new();
        for version in self.versions()? {
            out.insert(version, self.read(version)?);
        }
        Ok(out)
    }

    /// Persist `structure` as the next version. Returns `(version, created)`;
    /// an identical structure keeps the current version and writes nothing.
    pub fn save(&self, structure: &TableStructure) -> Result<(u32, bool)> {
        let next = match self.versions()?.last() {
            Some(&current) => {
                if &self.read(current)? == structure {
                    return Ok((current, false));
                }
                current + 1
            }
            None => 1,
        };

        fs::create_dir_all(&self.table.dir)?;
        let mut tmp = NamedTempFile::new_in(&self.table.dir)?;
        tmp.write_all(structure.to_statement().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.table.structure_path(next)).map_err(|e| e.error)?;

        Ok((next, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::schema::{FieldDefinition, FieldType};
    use crate::storage::layout::StorageLayout;

    #[test]
    fn identical_structures_do_not_bump_the_version() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let store = StructureStore::new(layout.table("p", "users"));

        let v1 = TableStructure::new("users").with_field(FieldDefinition::new("name", FieldType::String));
        assert_eq!(store.save(&v1).unwrap(), (1, true));
        assert_eq!(store.save(&v1).unwrap(), (1, false));

        let v2 = v1.clone().with_field(FieldDefinition::new("age", FieldType::Int).required());
        assert_eq!(store.save(&v2).unwrap(), (2, true));

        assert_eq!(store.versions().unwrap(), vec![1, 2]);
        assert_eq!(store.read(1).unwrap(), v1);
        assert_eq!(store.read(2).unwrap(), v2);
        assert!(store.read(3).unwrap_err().is(crate::core::error::ErrorKind::NotFound));
    }
}
