// Canonical quote model + series assembly
pub mod types;
pub mod assembler;

pub use assembler::assemble;
pub use types::*;
