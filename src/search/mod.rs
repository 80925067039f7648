pub mod executor;
pub mod filter;
pub mod results;
