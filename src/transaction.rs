//! Transaction module split into types, building and validation

pub mod builder;
pub mod types;
pub mod validation;

pub use builder::TransactionBuilder;
pub use types::*;
