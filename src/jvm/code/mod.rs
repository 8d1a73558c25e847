//! Method bodies: the supported instructions and the builders that emit them

mod code_builder;
mod code_builder_exts;
mod instructions;

pub use code_builder::*;
pub use code_builder_exts::*;
pub use instructions::*;
