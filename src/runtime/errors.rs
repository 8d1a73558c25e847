use super::Value;
use std::fmt;
use std::io;

/// Ways loading or running a class can fail
#[derive(Debug)]
pub enum Error {
    /// The bytes are not a class file this runtime understands
    ClassFormat(String),

    /// A symbolic reference could not be resolved
    Linkage(LinkageError),

    /// Method code failed verification
    Verification {
        class: String,
        method: String,
        kind: VerifyErrorKind,
    },

    /// An exception escaped the invoked method
    Invocation { method: String, cause: Exception },
}

#[derive(Debug, PartialEq, Eq)]
pub enum LinkageError {
    /// A class with this name is already defined
    DuplicateClass(String),

    NoClassDefFound {
        class: String,
        referenced_from: String,
    },

    NoSuchField {
        class: String,
        name: String,
        descriptor: String,
    },

    NoSuchMethod {
        class: String,
        name: String,
        descriptor: String,
    },

    /// The member exists, but not in the way it is used (eg. `invokestatic` on an instance method)
    IncompatibleClassChange(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum VerifyErrorKind {
    /// The method has a body, but no `Code` attribute
    MissingCode,

    UnsupportedOpcode { offset: usize, opcode: u8 },

    /// Code ends in the middle of an instruction
    Truncated { offset: usize },

    /// Operand does not point to the right sort of constant
    BadConstant {
        offset: usize,
        index: u16,
        expected: &'static str,
    },

    StackUnderflow { offset: usize, depth: usize },

    /// The stack grows past the declared `max_stack`
    StackOverflow { offset: usize, max_stack: u16 },

    /// Local slot is outside the declared `max_locals`
    LocalOutOfRange {
        offset: usize,
        slot: u8,
        max_locals: u16,
    },

    /// The parameters alone need more locals than declared
    ParametersExceedLocals { needed: usize, max_locals: u16 },

    ReturnTypeMismatch { offset: usize },

    /// Instruction after a terminator
    DeadCode { offset: usize },

    /// Execution can run past the last instruction
    FallsOffEnd,
}

/// Exceptions raised while running code
#[derive(Debug)]
pub enum Exception {
    /// Value thrown with `athrow`
    Thrown(Value),

    NullPointer(String),

    /// I/O failure inside a host method (eg. writing to a closed stream)
    Host(io::Error),

    /// Reference which linked at load time, but no longer resolves
    Linkage(LinkageError),

    StackOverflow,

    IllegalArgument(String),

    /// Broken interpreter invariant (verified code should never get here)
    Internal(String),
}

impl From<LinkageError> for Error {
    fn from(err: LinkageError) -> Error {
        Error::Linkage(err)
    }
}

impl From<io::Error> for Exception {
    fn from(err: io::Error) -> Exception {
        Exception::Host(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ClassFormat(msg) => write!(f, "class format error: {}", msg),
            Error::Linkage(err) => write!(f, "linkage error: {}", err),
            Error::Verification {
                class,
                method,
                kind,
            } => write!(f, "verification of {}.{} failed: {}", class, method, kind),
            Error::Invocation { method, cause } => {
                write!(f, "exception in {}: {}", method, cause)
            }
        }
    }
}

impl fmt::Display for LinkageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkageError::DuplicateClass(class) => {
                write!(f, "class {} is already defined", class)
            }
            LinkageError::NoClassDefFound {
                class,
                referenced_from,
            } => write!(
                f,
                "class {} (referenced from {}) is not defined",
                class, referenced_from
            ),
            LinkageError::NoSuchField {
                class,
                name,
                descriptor,
            } => write!(f, "no field {}.{}:{}", class, name, descriptor),
            LinkageError::NoSuchMethod {
                class,
                name,
                descriptor,
            } => write!(f, "no method {}.{}{}", class, name, descriptor),
            LinkageError::IncompatibleClassChange(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for VerifyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyErrorKind::MissingCode => write!(f, "missing Code attribute"),
            VerifyErrorKind::UnsupportedOpcode { offset, opcode } => {
                write!(f, "unsupported opcode 0x{:02x} at offset {}", opcode, offset)
            }
            VerifyErrorKind::Truncated { offset } => {
                write!(f, "truncated instruction at offset {}", offset)
            }
            VerifyErrorKind::BadConstant {
                offset,
                index,
                expected,
            } => write!(
                f,
                "constant #{} used at offset {} is not a {}",
                index, offset, expected
            ),
            VerifyErrorKind::StackUnderflow { offset, depth } => write!(
                f,
                "stack underflow at offset {} (depth {})",
                offset, depth
            ),
            VerifyErrorKind::StackOverflow { offset, max_stack } => write!(
                f,
                "stack exceeds declared max of {} at offset {}",
                max_stack, offset
            ),
            VerifyErrorKind::LocalOutOfRange {
                offset,
                slot,
                max_locals,
            } => write!(
                f,
                "local {} at offset {} is outside the declared max of {}",
                slot, offset, max_locals
            ),
            VerifyErrorKind::ParametersExceedLocals { needed, max_locals } => write!(
                f,
                "parameters need {} locals but only {} are declared",
                needed, max_locals
            ),
            VerifyErrorKind::ReturnTypeMismatch { offset } => {
                write!(f, "wrong return instruction at offset {}", offset)
            }
            VerifyErrorKind::DeadCode { offset } => {
                write!(f, "unreachable instruction at offset {}", offset)
            }
            VerifyErrorKind::FallsOffEnd => write!(f, "execution falls off the end of the code"),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exception::Thrown(value) => write!(f, "thrown {}", value),
            Exception::NullPointer(msg) => write!(f, "java.lang.NullPointerException: {}", msg),
            Exception::Host(err) => write!(f, "host I/O failure: {}", err),
            Exception::Linkage(err) => write!(f, "java.lang.LinkageError: {}", err),
            Exception::StackOverflow => write!(f, "java.lang.StackOverflowError"),
            Exception::IllegalArgument(msg) => {
                write!(f, "java.lang.IllegalArgumentException: {}", msg)
            }
            Exception::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Invocation {
                cause: Exception::Host(err),
                ..
            } => Some(err),
            _ => None,
        }
    }
}
