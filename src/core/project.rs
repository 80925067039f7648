use std::fs;
use std::io;
use crate::core::error::{Error, Result};
use crate::schema::schema::is_valid_name;
use crate::schema::versions::StructureStore;
use crate::storage::layout::StorageLayout;

/// Projects as directories under the storage root. Callers hold the matching locks.
#[derive(Debug, Clone)]
pub struct ProjectCatalog {
    layout: StorageLayout,
}

impl ProjectCatalog {
    pub fn new(layout: StorageLayout) -> Self {
        ProjectCatalog { layout }
    }

    /// Allowed characters: [a-zA-Z0-9_], not starting with a digit, 1-64 characters
    pub fn validate_name(kind: &str, name: &str) -> Result<()> {
        if is_valid_name(name) {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "Invalid {} name '{}': use 1-64 of a-z, A-Z, 0-9, _ not starting with a digit", kind, name
            )))
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        is_valid_name(name) && self.layout.project_dir(name).is_dir()
    }

    pub fn require(&self, name: &str) -> Result<()> {
        Self::validate_name("project", name)?;
        if self.exists(name) {
            Ok(())
        } else {
            Err(Error::not_found(format!("Project '{}' does not exist", name)))
        }
    }

    pub fn create(&self, name: &str) -> Result<()> {
        Self::validate_name("project", name)?;
        if self.exists(name) {
            return Err(Error::already_exists(format!("Project '{}' already exists", name)));
        }
        fs::create_dir_all(self.layout.project_dir(name))?;
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.require(name)?;
        fs::remove_dir_all(self.layout.project_dir(name))?;
        Ok(())
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.require(old)?;
        Self::validate_name("project", new)?;
        if self.exists(new) {
            return Err(Error::already_exists(format!("Project '{}' already exists", new)));
        }
        fs::rename(self.layout.project_dir(old), self.layout.project_dir(new))?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<String>> {
        list_subdirs(&self.layout.base_dir)
    }

    /// Tables of a project: subdirectories holding at least one structure version
    pub fn tables(&self, project: &str) -> Result<Vec<String>> {
        self.require(project)?;
        let mut tables = Vec::new();
        for name in list_subdirs(&self.layout.project_dir(project))? {
            let structures = StructureStore::new(self.layout.table(project, &name));
            if !structures.versions()?.is_empty() {
                tables.push(name);
            }
        }
        Ok(tables)
    }
}

fn list_subdirs(dir: &std::path::Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str().filter(|n| is_valid_name(n)) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use tempfile::TempDir;

    fn catalog(dir: &TempDir) -> ProjectCatalog {
        ProjectCatalog::new(StorageLayout::new(dir.path().to_path_buf()).unwrap())
    }

    #[test]
    fn create_rename_delete() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir);

        catalog.create("shop").unwrap();
        catalog.create("blog").unwrap();
        assert!(catalog.create("shop").unwrap_err().is(ErrorKind::AlreadyExists));
        assert_eq!(catalog.list().unwrap(), vec!["blog", "shop"]);

        catalog.rename("shop", "store").unwrap();
        assert!(catalog.rename("store", "blog").unwrap_err().is(ErrorKind::AlreadyExists));
        assert_eq!(catalog.list().unwrap(), vec!["blog", "store"]);

        catalog.delete("blog").unwrap();
        assert!(catalog.delete("blog").unwrap_err().is(ErrorKind::NotFound));
        assert_eq!(catalog.list().unwrap(), vec!["store"]);
    }

    #[test]
    fn names_are_validated() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir);

        for bad in ["", "../etc", "a b", "9lives", "x-y"] {
            assert!(catalog.create(bad).unwrap_err().is(ErrorKind::Validation), "{}", bad);
        }
        assert!(catalog.tables("missing").unwrap_err().is(ErrorKind::NotFound));
    }
}
