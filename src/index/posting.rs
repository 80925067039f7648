use roaring::RoaringTreemap;
use crate::core::error::{Error, Result};
use crate::core::types::RowId;

/// Encode an id set as the comma-joined list stored in field index segments
pub fn encode_ids(ids: &RoaringTreemap) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",")
}

pub fn decode_ids(bytes: &[u8]) -> Result<RoaringTreemap> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::storage("Id list is not valid UTF-8"))?;

    let mut ids = RoaringTreemap::new();
    for part in text.split(',').filter(|p| !p.is_empty()) {
        let id = part.trim().parse::<u64>()
            .map_err(|_| Error::storage(format!("Invalid row id '{}' in id list", part)))?;
        ids.insert(id);
    }
    Ok(ids)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub row_id: RowId,
    pub term_freq: u32,       // Occurrences of the word in the row's field
}

/// Posting list for a word
/// Note: Sorted by row_id
#[derive(Debug, Clone, Default)]
pub struct PostingList {
    pub postings: Vec<Posting>,
}

impl PostingList {
    pub fn new() -> Self {
        PostingList {
            postings: Vec::new(),
        }
    }

    pub fn add_posting(&mut self, posting: Posting) {
        match self.postings.binary_search_by_key(&posting.row_id, |p| p.row_id) {
            Ok(pos) => self.postings[pos] = posting,
            Err(pos) => self.postings.insert(pos, posting),
        }
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn total_freq(&self) -> u64 {
        self.postings.iter().map(|p| p.term_freq as u64).sum()
    }

    pub fn row_ids(&self) -> RoaringTreemap {
        self.postings.iter().map(|p| p.row_id.0).collect()
    }
}
