pub mod assembler;
pub mod format;
pub mod relay;
