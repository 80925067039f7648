use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use roaring::RoaringTreemap;
use crate::core::error::{Error, Result};
use crate::core::types::RowId;
use crate::index::posting::{Posting, PostingList};
use crate::storage::layout::TableLayout;

/// Inverted word index of one text field.
///
/// ```text
/// tindexes/{field}/{word}/{rowId}   term frequency
/// tindexes_rows/{field}/{rowId}     words written for the row, one per line
/// ```
///
/// Not synchronised: writers hold the indexer's per-field mutex.
pub struct TextIndex {
    words_dir: PathBuf,
    rows_dir: PathBuf,
}

impl TextIndex {
    pub fn open(table: &TableLayout, field: &str) -> Self {
        TextIndex {
            words_dir: table.text_dir(field),
            rows_dir: table.text_rows_dir(field),
        }
    }

    /// Replace every posting of `id` with `frequencies`
    pub fn replace(&self, id: RowId, frequencies: &BTreeMap<String, u32>) -> Result<()> {
        self.remove(id)?;
        if frequencies.is_empty() {
            return Ok(());
        }

        for (word, count) in frequencies {
            let dir = self.words_dir.join(word);
            fs::create_dir_all(&dir)?;
            fs::write(dir.join(id.to_string()), count.to_string())?;
        }

        fs::create_dir_all(&self.rows_dir)?;
        let words: Vec<&str> = frequencies.keys().map(String::as_str).collect();
        fs::write(self.rows_dir.join(id.to_string()), words.join("\n"))?;
        Ok(())
    }

    /// Drop every posting of `id`
    pub fn remove(&self, id: RowId) -> Result<()> {
        let rows_file = self.rows_dir.join(id.to_string());
        let words = match fs::read_to_string(&rows_file) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for word in words.lines().filter(|w| !w.is_empty()) {
            let dir = self.words_dir.join(word);
            remove_if_present(&dir.join(id.to_string()))?;
            // Fails while other rows still use the word
            let _ = fs::remove_dir(&dir);
        }

        remove_if_present(&rows_file)
    }

    pub fn postings(&self, word: &str) -> Result<PostingList> {
        let mut list = PostingList::new();
        let entries = match fs::read_dir(self.words_dir.join(word)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(list),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let Some(id) = entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok()) else {
                continue;
            };
            let term_freq = match fs::read_to_string(entry.path()) {
                Ok(text) => text.trim().parse::<u32>().map_err(|_| {
                    Error::storage(format!("Corrupt posting {}", entry.path().display()))
                })?,
                // Removed by a concurrent reindex
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            list.add_posting(Posting { row_id: RowId(id), term_freq });
        }

        Ok(list)
    }

    /// Rows holding every word. No words matches nothing.
    pub fn search(&self, words: &BTreeSet<String>) -> Result<RoaringTreemap> {
        let mut result: Option<RoaringTreemap> = None;

        for word in words {
            let ids = self.postings(word)?.row_ids();
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
        for dir in [&self.words_dir, &self.rows_dir] {
            match fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyzer::Analyzer;
    use crate::storage::layout::StorageLayout;
    use tempfile::TempDir;

    #[test]
    fn reindexing_drops_stale_words() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let table = layout.table("p", "posts");
        let index = TextIndex::open(&table, "body");
        let analyzer = Analyzer::full_text();

        index.replace(RowId(1), &analyzer.term_frequencies("rust rust and go")).unwrap();
        index.replace(RowId(2), &analyzer.term_frequencies("go home")).unwrap();

        let rust = index.postings("rust").unwrap();
        assert_eq!(rust.postings, vec![Posting { row_id: RowId(1), term_freq: 2 }]);
        assert_eq!(index.postings("go").unwrap().len(), 2);

        index.replace(RowId(1), &analyzer.term_frequencies("zig")).unwrap();
        assert!(index.postings("rust").unwrap().is_empty());
        assert!(!table.text_dir("body").join("rust").exists());

        let search = |text: &str| index.search(&analyzer.terms(text)).unwrap().iter().collect::<Vec<_>>();
        assert_eq!(search("go"), vec![2]);
        assert_eq!(search("Zig!"), vec![1]);
        assert_eq!(search("go zig"), Vec::<u64>::new());

        index.remove(RowId(2)).unwrap();
        assert_eq!(search("go"), Vec::<u64>::new());
        index.remove(RowId(2)).unwrap();
    }
}
