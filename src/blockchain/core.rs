// core.rs splits chain responsibilities into submodules: block model,
// traversal, unspent-output derivation and linkage validation.
pub mod chain;
pub mod cursor;
pub mod resolver;
pub mod validation;

pub use chain::*;
pub use cursor::*;
pub use resolver::*;
pub use validation::*;
