use super::class_file::Constant;
use std::fmt;

/// Ways assembling a class can fail
///
/// Every one of these is detected at the call which violates the invariant: nothing gets
/// retried and no partially assembled class is ever returned.
#[derive(Debug)]
pub enum Error {
    /// The constant pool would need an index that does not fit in the class file
    ConstantPoolOverflow {
        constant: Constant,
        offset: usize,
    },

    /// A UTF-8 constant whose modified UTF-8 encoding is longer than 65535 bytes
    Utf8ConstantTooLong(usize),

    IoError(std::io::Error),

    /// Instruction would pop more operands than are on the stack
    StackUnderflow {
        instruction: String,
        offset: usize,
        depth: usize,
    },

    /// The method body does not end with `return`, `areturn`, or `athrow`
    UnterminatedMethod {
        last_instruction: Option<String>,
    },

    /// Instruction emitted after the method body was already terminated
    UnreachableInstruction {
        instruction: String,
        offset: usize,
    },

    /// Return instruction does not match the return type of the method
    ReturnTypeMismatch {
        instruction: String,
        descriptor: String,
    },

    /// Loading `this` in a method which has no receiver
    NoReceiver,

    /// Explicitly declared maximums are smaller than what the code needs
    DeclaredMaxsTooSmall {
        declared_stack: u16,
        declared_locals: u16,
        computed_stack: u16,
        computed_locals: u16,
    },

    MethodCodeOverflow(usize),
    MethodCodeMaxStackOverflow(usize),
    MethodCodeMaxLocalsOverflow(usize),

    /// Method or field descriptor could not be parsed
    BadDescriptor(String),

    /// Operation is not valid in the current state of the class assembler
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    /// The class as a whole is not well-formed
    Assembly(AssemblyError),
}

/// Reasons a class is not well-formed
#[derive(Debug)]
pub enum AssemblyError {
    /// `finish` was called before any method was added
    NoMethods,

    /// Only a constructor was added, so there is no entry point
    NoStaticMethods,

    /// A method with the same name and descriptor was already added
    DuplicateMethod { name: String, descriptor: String },

    /// The constructor chains to a class which is not the superclass
    SuperclassMismatch { expected: String, found: String },

    /// A class, method, or field name is invalid
    InvalidName(String),
}

impl From<AssemblyError> for Error {
    fn from(err: AssemblyError) -> Error {
        Error::Assembly(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConstantPoolOverflow { constant, offset } => write!(
                f,
                "constant pool overflow at index {} while adding {:?}",
                offset, constant
            ),
            Error::Utf8ConstantTooLong(len) => {
                write!(f, "UTF-8 constant is {} bytes long (max 65535)", len)
            }
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::StackUnderflow {
                instruction,
                offset,
                depth,
            } => write!(
                f,
                "stack underflow at offset {}: {} with only {} operand(s) on the stack",
                offset, instruction, depth
            ),
            Error::UnterminatedMethod { last_instruction } => match last_instruction {
                Some(insn) => write!(f, "method ends with non-terminating {}", insn),
                None => write!(f, "method body is empty"),
            },
            Error::UnreachableInstruction {
                instruction,
                offset,
            } => write!(
                f,
                "{} at offset {} follows a terminating instruction",
                instruction, offset
            ),
            Error::ReturnTypeMismatch {
                instruction,
                descriptor,
            } => write!(
                f,
                "{} does not match method descriptor {}",
                instruction, descriptor
            ),
            Error::NoReceiver => write!(f, "static methods have no `this`"),
            Error::DeclaredMaxsTooSmall {
                declared_stack,
                declared_locals,
                computed_stack,
                computed_locals,
            } => write!(
                f,
                "declared max stack/locals {}/{} but code needs {}/{}",
                declared_stack, declared_locals, computed_stack, computed_locals
            ),
            Error::MethodCodeOverflow(len) => {
                write!(f, "method code is {} bytes long (max 65535)", len)
            }
            Error::MethodCodeMaxStackOverflow(max) => write!(f, "max stack {} overflows", max),
            Error::MethodCodeMaxLocalsOverflow(max) => write!(f, "max locals {} overflows", max),
            Error::BadDescriptor(msg) => write!(f, "bad descriptor: {}", msg),
            Error::InvalidState { state, operation } => {
                write!(f, "cannot {} when class assembler is {}", operation, state)
            }
            Error::Assembly(err) => write!(f, "{}", err),
        }
    }
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyError::NoMethods => write!(f, "class has no methods"),
            AssemblyError::NoStaticMethods => write!(f, "class has no static methods"),
            AssemblyError::DuplicateMethod { name, descriptor } => {
                write!(f, "method {}{} is defined twice", name, descriptor)
            }
            AssemblyError::SuperclassMismatch { expected, found } => write!(
                f,
                "constructor chains to {} but the superclass is {}",
                found, expected
            ),
            AssemblyError::InvalidName(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}
