use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};
use crate::core::error::{Error, Result};

pub const ID_FIELD: &str = "id";
pub const VERSION_FIELD: &str = "_version";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub u64);

impl RowId {
    pub fn new(id: u64) -> Self {
        RowId(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for RowId {
    fn from(id: u64) -> Self {
        RowId(id)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored row: field name -> value, always carrying `id` and `_version`
pub type Row = BTreeMap<String, String>;

/// `id` and `_version` are managed by the store and never user-writable
pub fn is_reserved(name: &str) -> bool {
    name == ID_FIELD || name == VERSION_FIELD
}

/// Accessors for the two mandatory row fields
pub trait RowExt {
    fn row_id(&self) -> Result<RowId>;
    fn row_version(&self) -> Result<u32>;
}

impl RowExt for Row {
    fn row_id(&self) -> Result<RowId> {
        self.get(ID_FIELD)
            .and_then(|v| v.parse::<u64>().ok())
            .map(RowId)
            .ok_or_else(|| Error::storage("Row record without a valid id"))
    }

    fn row_version(&self) -> Result<u32> {
        self.get(VERSION_FIELD)
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| Error::storage("Row record without a valid _version"))
    }
}
