//! The "Hello world" class, assembled three different ways
//!
//! Each style produces a class equivalent to
//!
//! ```java
//! public class Example {
//!     public static void main(String[] args) {
//!         System.out.println("Hello world!");
//!     }
//! }
//! ```
//!
//! but goes through a different layer of the assembler to get there.

use crate::jvm::{
    AssemblerSettings, BinaryName, ClassAssembler, CodeBuilderExts, Error, FieldRef, FieldType,
    Instruction, InvokeType, MethodAccessFlags, MethodDescriptor, MethodOp, MethodRef, Name,
    RenderDescriptor, UnqualifiedName,
};
use crate::jvm::class_file::ClassFile;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_CLASS_NAME: &str = "Example";
pub const DEFAULT_MESSAGE: &str = "Hello world!";

/// Which layer of the assembler is used to build the class
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HelloStyle {
    /// Raw instructions, with the stack and locals maximums declared by hand
    LowLevel,

    /// Typed helpers (`load_this`, `get_static`, ...), with maximums computed
    Adapter,

    /// A list of [`MethodOp`] handed to the class assembler
    Ops,
}

impl HelloStyle {
    pub const ALL: [HelloStyle; 3] = [HelloStyle::LowLevel, HelloStyle::Adapter, HelloStyle::Ops];

    pub fn name(&self) -> &'static str {
        match self {
            HelloStyle::LowLevel => "low-level",
            HelloStyle::Adapter => "adapter",
            HelloStyle::Ops => "ops",
        }
    }

    /// Assembler with the whole class added to it, ready to be finished
    pub fn assembler(&self, class_name: &str, message: &str) -> Result<ClassAssembler, Error> {
        log::info!(
            "Assembling {} in the {} style",
            class_name,
            self.name()
        );
        match self {
            HelloStyle::LowLevel => low_level_assembler(class_name, message),
            HelloStyle::Adapter => adapter_assembler(class_name, message),
            HelloStyle::Ops => ops_assembler(class_name, message),
        }
    }

    /// Assemble the class in this style
    pub fn assemble(&self, class_name: &str, message: &str) -> Result<Vec<u8>, Error> {
        self.assembler(class_name, message)?.finish()
    }

    /// Assemble the class in this style, stopping short of serializing it
    pub fn assemble_class_file(
        &self,
        class_name: &str,
        message: &str,
    ) -> Result<ClassFile, Error> {
        self.assembler(class_name, message)?.finish_class_file()
    }
}

impl fmt::Display for HelloStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HelloStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<HelloStyle, String> {
        HelloStyle::ALL
            .iter()
            .find(|style| style.name() == s)
            .copied()
            .ok_or_else(|| format!("Unknown style '{}'", s))
    }
}

/// Emit every instruction by hand and declare `(1, 1)` and `(2, 2)` as the maximums
fn low_level_assembler(class_name: &str, message: &str) -> Result<ClassAssembler, Error> {
    let mut assembler = ClassAssembler::new(AssemblerSettings::new(class_name))?;

    assembler.add_method(
        MethodAccessFlags::PUBLIC,
        UnqualifiedName::INIT,
        MethodDescriptor::VOID,
        |code| {
            code.emit(Instruction::ALoad(0))?;
            code.emit(Instruction::Invoke(
                InvokeType::Special,
                MethodRef {
                    class: BinaryName::OBJECT,
                    name: UnqualifiedName::INIT,
                    descriptor: MethodDescriptor::VOID,
                },
            ))?;
            code.emit(Instruction::Return)?;
            code.declare_maxs(1, 1);
            Ok(())
        },
    )?;

    assembler.add_method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        UnqualifiedName::MAIN,
        MethodDescriptor::main(),
        |code| {
            code.emit(Instruction::GetStatic(FieldRef {
                class: BinaryName::SYSTEM,
                name: UnqualifiedName::OUT,
                descriptor: FieldType::print_stream(),
            }))?;
            code.emit(Instruction::Ldc(message.to_owned()))?;
            code.emit(Instruction::Invoke(
                InvokeType::Virtual,
                MethodRef {
                    class: BinaryName::PRINTSTREAM,
                    name: UnqualifiedName::PRINTLN,
                    descriptor: MethodDescriptor {
                        parameters: vec![FieldType::string()],
                        return_type: None,
                    },
                },
            ))?;
            code.emit(Instruction::Return)?;
            code.declare_maxs(2, 2);
            Ok(())
        },
    )?;

    Ok(assembler)
}

/// Use the typed helpers, with methods spelled out as Java declarations
fn adapter_assembler(class_name: &str, message: &str) -> Result<ClassAssembler, Error> {
    let mut assembler = ClassAssembler::new(AssemblerSettings::new(class_name))?;

    let (name, descriptor) = declaration("void <init> ()")?;
    assembler.add_method(
        MethodAccessFlags::PUBLIC,
        name,
        descriptor.clone(),
        |code| {
            code.load_this()?;
            code.invoke_constructor(BinaryName::OBJECT, descriptor)?;
            code.return_value()
        },
    )?;

    let (name, descriptor) = declaration("void main (String[])")?;
    assembler.add_method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        name,
        descriptor,
        |code| {
            code.get_static(
                BinaryName::SYSTEM,
                UnqualifiedName::OUT,
                FieldType::print_stream(),
            )?;
            code.push_string(message)?;
            code.invoke_declared(
                InvokeType::Virtual,
                BinaryName::PRINTSTREAM,
                "void println (String)",
            )?;
            code.return_value()
        },
    )?;

    Ok(assembler)
}

/// Describe the class as a list of operations and let the assembler do the rest
fn ops_assembler(class_name: &str, message: &str) -> Result<ClassAssembler, Error> {
    let mut assembler = ClassAssembler::new(AssemblerSettings::new(class_name))?;
    assembler.add_default_constructor(BinaryName::OBJECT.as_str())?;
    assembler.add_static_method(
        UnqualifiedName::MAIN.as_str(),
        &MethodDescriptor::main().render(),
        &[MethodOp::Println(message.to_owned())],
    )?;
    Ok(assembler)
}

fn declaration(source: &str) -> Result<(UnqualifiedName, MethodDescriptor), Error> {
    MethodDescriptor::from_java_declaration(source)
        .map_err(|err| Error::BadDescriptor(err.to_string()))
}
