pub mod entity;
pub mod error;
pub mod parser;
pub mod scope;
