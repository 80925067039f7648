use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,     // Malformed statement, type mismatch, length/format violation
    Constraint,     // Unique, required, foreign key and unique group violations
    NotFound,       // Missing project, table, row or structure version
    AlreadyExists,
    Storage,        // I/O failure on segment, index or structure files
    Internal,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn validation(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Validation, context.into())
    }

    pub fn constraint(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Constraint, context.into())
    }

    pub fn not_found(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotFound, context.into())
    }

    pub fn already_exists(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::AlreadyExists, context.into())
    }

    pub fn storage(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Storage, context.into())
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Storage,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Storage,
            context: format!("Corrupt record: {}", err),
        }
    }
}

impl From<lz4_flex::block::DecompressError> for Error {
    fn from(err: lz4_flex::block::DecompressError) -> Self {
        Error {
            kind: ErrorKind::Storage,
            context: format!("Corrupt row block: {}", err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Validation,
            context: format!("Invalid configuration: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
