//! Assembling JVM class files
//!
//! The entry point is [`ClassAssembler`], which owns the constant pool for one class and hands
//! out a [`CodeBuilder`] for each method body:
//!
//! ```
//! use classasm::jvm::*;
//!
//! let mut assembler = ClassAssembler::new(AssemblerSettings::new("Example")).unwrap();
//! assembler.add_default_constructor("java/lang/Object").unwrap();
//! assembler
//!     .add_static_method(
//!         "main",
//!         "([Ljava/lang/String;)V",
//!         &[MethodOp::Println(String::from("Hello world!"))],
//!     )
//!     .unwrap();
//! let bytes: Vec<u8> = assembler.finish().unwrap();
//! assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
//! ```

mod access_flags;
mod class_assembler;
pub mod class_file;
mod code;
mod descriptors;
mod errors;
mod names;

pub use access_flags::*;
pub use class_assembler::*;
pub use code::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
