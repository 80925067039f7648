pub mod layout;
pub mod segment;
pub mod row_store;
pub mod file_lock;
