//! Binary layout of class files
//!
//! Everything in here is a fairly direct model of the [class file format][0]. The types know how
//! to serialize themselves (see [`Serialize`]) but do not check that what they contain makes
//! sense: that is the job of [`crate::jvm::CodeBuilder`] and [`crate::jvm::ClassAssembler`].
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html

mod attribute;
mod class;
mod constants;
mod serialize;
mod version;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use serialize::*;
pub use version::*;
