//! In-process host runtime for loading and running assembled classes
//!
//! [`DynamicLoader`] is the entry point: it reads class bytes, verifies the code of every method,
//! links the symbolic references against a [`Host`], and then runs entry points on a small
//! interpreter.

mod class_reader;
mod errors;
mod host;
mod interpreter;
mod loader;
mod value;

pub use class_reader::*;
pub use errors::*;
pub use host::*;
pub use loader::*;
pub use value::*;
