//! Worker and job configuration: YAML types, parsing, semantic validation.

pub mod parser;
pub mod types;
pub mod validator;
