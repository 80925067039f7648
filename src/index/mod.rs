pub mod comparable;
pub mod field_index;
pub mod like_index;
pub mod posting;
pub mod text_index;
