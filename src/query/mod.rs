pub mod ast;
pub mod sections;
pub mod definition;
pub mod parser;
pub mod planner;
