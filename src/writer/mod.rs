pub mod cascade;
pub mod mutation;
pub mod row_index;
