use std::path::{Path, PathBuf};
use std::fs;
use crate::core::error::Result;
use crate::core::types::RowId;

/// Directory structure for all projects
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,      // Root directory, one subdirectory per project
}

/// Data and offset-index files of one segment store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPaths {
    pub index: PathBuf,         // Offset index (.flaa1)
    pub data: PathBuf,          // Data blob (.flaa2)
}

/// Files of a single table
///
/// ```text
/// {project}/{table}/
///   structure{N}.txt             schema versions
///   data.flaa1 / data.flaa2      row segment
///   {field}_indexes.flaa1/.flaa2 per-field value -> ids segments
///   tindexes/{field}/{word}/{id} full-text postings (term frequency)
///   tindexes_rows/{field}/{id}   words last indexed for a row
///   likeindexes/{field}/{char}/  character postings for `like`
///   txtinstrs/                   pending full-text jobs
///   lastId                       id counter
/// ```
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir)?;
        Ok(StorageLayout { base_dir })
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.base_dir.join(project)
    }

    pub fn table(&self, project: &str, table: &str) -> TableLayout {
        TableLayout {
            dir: self.project_dir(project).join(table),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(".lock")
    }
}

impl TableLayout {
    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    pub fn structure_path(&self, version: u32) -> PathBuf {
        self.dir.join(format!("structure{}.txt", version))
    }

    pub fn data_segment(&self) -> SegmentPaths {
        segment_paths(&self.dir, "data")
    }

    pub fn field_segment(&self, field: &str) -> SegmentPaths {
        segment_paths(&self.dir, &format!("{}_indexes", field))
    }

    pub fn text_dir(&self, field: &str) -> PathBuf {
        self.dir.join("tindexes").join(field)
    }

    pub fn text_rows_dir(&self, field: &str) -> PathBuf {
        self.dir.join("tindexes_rows").join(field)
    }

    pub fn like_dir(&self, field: &str) -> PathBuf {
        self.dir.join("likeindexes").join(field)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.dir.join("txtinstrs")
    }

    pub fn staging_path(&self, row_id: RowId, field: &str, extension: &str) -> PathBuf {
        self.staging_dir().join(format!("{}#{}.{}", row_id, field, extension))
    }

    pub fn last_id_path(&self) -> PathBuf {
        self.dir.join("lastId")
    }
}

fn segment_paths(dir: &Path, stem: &str) -> SegmentPaths {
    SegmentPaths {
        index: dir.join(format!("{}.flaa1", stem)),
        data: dir.join(format!("{}.flaa2", stem)),
    }
}
