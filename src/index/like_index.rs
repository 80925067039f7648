use std::fs;
use std::io;
use std::path::PathBuf;
use roaring::RoaringTreemap;
use crate::analysis::analyzer::Analyzer;
use crate::core::error::Result;
use crate::core::types::RowId;

/// Character postings backing `like`: `likeindexes/{field}/{char as hex}/{rowId}`.
///
/// A pattern matches every row holding all of its characters somewhere in the
/// value, in any order. There is no substring verification pass.
pub struct LikeIndex {
    dir: PathBuf,
    analyzer: Analyzer,
}

impl LikeIndex {
    pub fn open(dir: PathBuf) -> Self {
        LikeIndex {
            dir,
            analyzer: Analyzer::like(),
        }
    }

    pub fn insert(&self, value: &str, id: RowId) -> Result<()> {
        for term in self.analyzer.terms(value) {
            let dir = self.char_dir(&term);
            fs::create_dir_all(&dir)?;
            fs::write(dir.join(id.to_string()), b"")?;
        }
        Ok(())
    }

    pub fn remove(&self, value: &str, id: RowId) -> Result<()> {
        for term in self.analyzer.terms(value) {
            let dir = self.char_dir(&term);
            match fs::remove_file(dir.join(id.to_string())) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            // Fails while other rows still hold the character
            let _ = fs::remove_dir(&dir);
        }
        Ok(())
    }

    pub fn search(&self, pattern: &str) -> Result<RoaringTreemap> {
        let mut result: Option<RoaringTreemap> = None;

        for term in self.analyzer.terms(pattern) {
            let ids = self.ids_for(&term)?;
            let narrowed = match result {
                Some(acc) => acc & ids,
                None => ids,
            };
            if narrowed.is_empty() {
                return Ok(narrowed);
            }
            result = Some(narrowed);
        }

        Ok(result.unwrap_or_default())
    }

    pub fn destroy(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn ids_for(&self, term: &str) -> Result<RoaringTreemap> {
        let entries = match fs::read_dir(self.char_dir(term)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RoaringTreemap::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = RoaringTreemap::new();
        for entry in entries {
            if let Some(id) = entry?.file_name().to_str().and_then(|n| n.parse::<u64>().ok()) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    fn char_dir(&self, term: &str) -> PathBuf {
        let hex: String = term.chars().map(|c| format!("{:x}", c as u32)).collect::<Vec<_>>().join("_");
        self.dir.join(hex)
    }
}
