//! AST of the supported subset of JVM bytecode
//!
//! The representation is slightly more convenient than the raw opcodes: short forms like
//! `aload_0` and the `ldc`/`ldc_w` split do not show up as separate variants, but get picked when
//! serializing based on the operand.
//!
//! Instructions are generic over how constant pool operands are represented, so the same type
//! describes both instructions being built (with symbolic references) and instructions read from
//! or written to a class file (with constant pool indices).

use crate::jvm::class_file::{ConstantIndex, Serialize};
use crate::jvm::{BinaryName, FieldType, MethodDescriptor, RenderDescriptor, UnqualifiedName};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::fmt;
use std::io::Result;

/// Non-branching and terminating JVM bytecode instructions
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction<Str, Field, Method> {
    /// Push a reference from a local variable (covers `aload` and `aload_{0,3}`)
    ALoad(u8),

    /// Pop a reference into a local variable (covers `astore` and `astore_{0,3}`)
    AStore(u8),

    Pop,
    Dup,

    /// Push a constant string (covers `ldc` and `ldc_w`)
    Ldc(Str),

    GetStatic(Field),
    Invoke(InvokeType, Method),

    Return,
    AReturn,
    AThrow,
}

/// Ways of invoking a method
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InvokeType {
    /// Constructors, private methods, and superclass methods
    Special,
    Virtual,
    Static,
}

/// Reference to a field, by name
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: FieldType,
}

/// Reference to a method, by name
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.class, self.name, self.descriptor.render())
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.name, self.descriptor.render())
    }
}

/// Instructions as the code builder receives them
pub type SymbolicInstruction = Instruction<String, FieldRef, MethodRef>;

/// Instructions as they appear in the code array
pub type RawInstruction = Instruction<ConstantIndex, ConstantIndex, ConstantIndex>;

/// How an instruction changes the depth of the operand stack
///
/// The pops happen before the pushes, so the stack never holds `depth - pops + pushes` and
/// `depth` at the same time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StackEffect {
    pub pops: usize,
    pub pushes: usize,
}

impl<S, F, M> Instruction<S, F, M> {
    /// Does this instruction end the method?
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Return | Instruction::AReturn | Instruction::AThrow
        )
    }

    /// Local variable slot the instruction reads or writes
    pub fn local_slot(&self) -> Option<u8> {
        match self {
            Instruction::ALoad(slot) | Instruction::AStore(slot) => Some(*slot),
            _ => None,
        }
    }

    /// Convert between representations of the constant pool operands
    pub fn map<S2, F2, M2, E>(
        &self,
        map_str: impl FnOnce(&S) -> std::result::Result<S2, E>,
        map_field: impl FnOnce(&F) -> std::result::Result<F2, E>,
        map_method: impl FnOnce(&M) -> std::result::Result<M2, E>,
    ) -> std::result::Result<Instruction<S2, F2, M2>, E> {
        use Instruction::*;
        Ok(match self {
            ALoad(slot) => ALoad(*slot),
            AStore(slot) => AStore(*slot),
            Pop => Pop,
            Dup => Dup,
            Ldc(string) => Ldc(map_str(string)?),
            GetStatic(field) => GetStatic(map_field(field)?),
            Invoke(typ, method) => Invoke(*typ, map_method(method)?),
            Return => Return,
            AReturn => AReturn,
            AThrow => AThrow,
        })
    }
}

impl SymbolicInstruction {
    /// Static effect of the instruction on the operand stack
    ///
    /// Invocations pop the receiver (unless static) and all of the arguments, then push the
    /// return value (if any). Widths come from the descriptors, so `long` and `double` count
    /// twice.
    pub fn stack_effect(&self) -> StackEffect {
        let (pops, pushes) = match self {
            Instruction::ALoad(_) => (0, 1),
            Instruction::AStore(_) => (1, 0),
            Instruction::Pop => (1, 0),
            Instruction::Dup => (1, 2),
            Instruction::Ldc(_) => (0, 1),
            Instruction::GetStatic(field) => (0, field.descriptor.width()),
            Instruction::Invoke(typ, method) => {
                let has_receiver = *typ != InvokeType::Static;
                (
                    method.descriptor.parameter_length(has_receiver),
                    method.descriptor.return_width(),
                )
            }
            Instruction::Return => (0, 0),
            Instruction::AReturn => (1, 0),
            Instruction::AThrow => (1, 0),
        };
        StackEffect { pops, pushes }
    }
}

impl fmt::Display for SymbolicInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::ALoad(slot) => write!(f, "aload {}", slot),
            Instruction::AStore(slot) => write!(f, "astore {}", slot),
            Instruction::Pop => write!(f, "pop"),
            Instruction::Dup => write!(f, "dup"),
            Instruction::Ldc(string) => write!(f, "ldc {:?}", string),
            Instruction::GetStatic(field) => write!(f, "getstatic {}", field),
            Instruction::Invoke(InvokeType::Special, method) => {
                write!(f, "invokespecial {}", method)
            }
            Instruction::Invoke(InvokeType::Virtual, method) => {
                write!(f, "invokevirtual {}", method)
            }
            Instruction::Invoke(InvokeType::Static, method) => {
                write!(f, "invokestatic {}", method)
            }
            Instruction::Return => write!(f, "return"),
            Instruction::AReturn => write!(f, "areturn"),
            Instruction::AThrow => write!(f, "athrow"),
        }
    }
}

pub mod opcodes {
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const ALOAD: u8 = 0x19;
    pub const ALOAD_0: u8 = 0x2A;
    pub const ALOAD_3: u8 = 0x2D;
    pub const ASTORE: u8 = 0x3A;
    pub const ASTORE_0: u8 = 0x4B;
    pub const ASTORE_3: u8 = 0x4E;
    pub const POP: u8 = 0x57;
    pub const DUP: u8 = 0x59;
    pub const ARETURN: u8 = 0xB0;
    pub const RETURN: u8 = 0xB1;
    pub const GETSTATIC: u8 = 0xB2;
    pub const INVOKEVIRTUAL: u8 = 0xB6;
    pub const INVOKESPECIAL: u8 = 0xB7;
    pub const INVOKESTATIC: u8 = 0xB8;
    pub const ATHROW: u8 = 0xBF;
}

impl RawInstruction {
    /// Number of bytes the instruction occupies in the code array
    pub fn width(&self) -> usize {
        match self {
            Instruction::ALoad(0..=3) | Instruction::AStore(0..=3) => 1,
            Instruction::ALoad(_) | Instruction::AStore(_) => 2,
            Instruction::Pop | Instruction::Dup => 1,
            Instruction::Ldc(ConstantIndex(0..=255)) => 2,
            Instruction::Ldc(_) | Instruction::GetStatic(_) | Instruction::Invoke(_, _) => 3,
            Instruction::Return | Instruction::AReturn | Instruction::AThrow => 1,
        }
    }

    /// Read the next instruction from a code array
    pub fn decode(reader: &mut &[u8]) -> std::result::Result<RawInstruction, DecodeError> {
        use opcodes::*;

        let opcode = reader.read_u8().map_err(|_| DecodeError::Truncated)?;
        let mut index = || {
            reader
                .read_u16::<BigEndian>()
                .map(ConstantIndex)
                .map_err(|_| DecodeError::Truncated)
        };
        let insn = match opcode {
            ALOAD_0..=ALOAD_3 => Instruction::ALoad(opcode - ALOAD_0),
            ASTORE_0..=ASTORE_3 => Instruction::AStore(opcode - ASTORE_0),
            POP => Instruction::Pop,
            DUP => Instruction::Dup,
            LDC_W => Instruction::Ldc(index()?),
            GETSTATIC => Instruction::GetStatic(index()?),
            INVOKEVIRTUAL => Instruction::Invoke(InvokeType::Virtual, index()?),
            INVOKESPECIAL => Instruction::Invoke(InvokeType::Special, index()?),
            INVOKESTATIC => Instruction::Invoke(InvokeType::Static, index()?),
            RETURN => Instruction::Return,
            ARETURN => Instruction::AReturn,
            ATHROW => Instruction::AThrow,
            LDC | ALOAD | ASTORE => {
                let operand = reader.read_u8().map_err(|_| DecodeError::Truncated)?;
                match opcode {
                    LDC => Instruction::Ldc(ConstantIndex(operand as u16)),
                    ALOAD => Instruction::ALoad(operand),
                    _ => Instruction::AStore(operand),
                }
            }
            _ => return Err(DecodeError::UnsupportedOpcode(opcode)),
        };
        Ok(insn)
    }
}

/// Reasons a code array cannot be decoded
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Opcode is not part of the supported subset (or not an opcode at all)
    UnsupportedOpcode(u8),

    /// Code array ends in the middle of an instruction
    Truncated,
}

impl Serialize for RawInstruction {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        use opcodes::*;

        fn serialize_local<W: WriteBytesExt>(
            slot: u8,
            short_opcode: u8,
            opcode: u8,
            writer: &mut W,
        ) -> Result<()> {
            if slot <= 3 {
                (short_opcode + slot).serialize(writer)
            } else {
                opcode.serialize(writer)?;
                slot.serialize(writer)
            }
        }

        match self {
            Instruction::ALoad(slot) => serialize_local(*slot, ALOAD_0, ALOAD, writer)?,
            Instruction::AStore(slot) => serialize_local(*slot, ASTORE_0, ASTORE, writer)?,
            Instruction::Pop => POP.serialize(writer)?,
            Instruction::Dup => DUP.serialize(writer)?,
            Instruction::Ldc(idx) => match u8::try_from(idx.0) {
                Ok(short_idx) => {
                    LDC.serialize(writer)?;
                    short_idx.serialize(writer)?;
                }
                Err(_) => {
                    LDC_W.serialize(writer)?;
                    idx.serialize(writer)?;
                }
            },
            Instruction::GetStatic(idx) => {
                GETSTATIC.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::Invoke(typ, idx) => {
                let opcode = match typ {
                    InvokeType::Virtual => INVOKEVIRTUAL,
                    InvokeType::Special => INVOKESPECIAL,
                    InvokeType::Static => INVOKESTATIC,
                };
                opcode.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::Return => RETURN.serialize(writer)?,
            Instruction::AReturn => ARETURN.serialize(writer)?,
            Instruction::AThrow => ATHROW.serialize(writer)?,
        };
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode(insn: RawInstruction) -> Vec<u8> {
        let mut bytes = vec![];
        insn.serialize(&mut bytes).unwrap();
        assert_eq!(bytes.len(), insn.width(), "width of {:?}", insn);
        bytes
    }

    #[test]
    fn short_and_long_forms() {
        assert_eq!(encode(Instruction::ALoad(0)), vec![0x2A]);
        assert_eq!(encode(Instruction::ALoad(3)), vec![0x2D]);
        assert_eq!(encode(Instruction::ALoad(4)), vec![0x19, 4]);
        assert_eq!(encode(Instruction::AStore(1)), vec![0x4C]);
        assert_eq!(encode(Instruction::AStore(200)), vec![0x3A, 200]);
        assert_eq!(encode(Instruction::Ldc(ConstantIndex(0x12))), vec![0x12, 0x12]);
        assert_eq!(
            encode(Instruction::Ldc(ConstantIndex(0x0102))),
            vec![0x13, 0x01, 0x02]
        );
    }

    #[test]
    fn member_references() {
        assert_eq!(
            encode(Instruction::GetStatic(ConstantIndex(7))),
            vec![0xB2, 0, 7]
        );
        assert_eq!(
            encode(Instruction::Invoke(InvokeType::Special, ConstantIndex(1))),
            vec![0xB7, 0, 1]
        );
        assert_eq!(
            encode(Instruction::Invoke(InvokeType::Virtual, ConstantIndex(300))),
            vec![0xB6, 1, 44]
        );
        assert_eq!(
            encode(Instruction::Invoke(InvokeType::Static, ConstantIndex(2))),
            vec![0xB8, 0, 2]
        );
    }

    #[test]
    fn decoding() {
        let code: Vec<u8> = vec![0x2A, 0x19, 9, 0x12, 5, 0xB6, 0, 3, 0xB1];
        let mut reader: &[u8] = &code;
        let mut decoded = vec![];
        while !reader.is_empty() {
            decoded.push(RawInstruction::decode(&mut reader).unwrap());
        }
        assert_eq!(
            decoded,
            vec![
                Instruction::ALoad(0),
                Instruction::ALoad(9),
                Instruction::Ldc(ConstantIndex(5)),
                Instruction::Invoke(InvokeType::Virtual, ConstantIndex(3)),
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn decoding_failures() {
        let mut reader: &[u8] = &[0x60];
        assert_eq!(
            RawInstruction::decode(&mut reader),
            Err(DecodeError::UnsupportedOpcode(0x60))
        );
        let mut reader: &[u8] = &[0xB2, 0x00];
        assert_eq!(
            RawInstruction::decode(&mut reader),
            Err(DecodeError::Truncated)
        );
    }

    #[test]
    fn stack_effects() {
        let println = Instruction::Invoke(
            InvokeType::Virtual,
            MethodRef {
                class: BinaryName::PRINTSTREAM,
                name: UnqualifiedName::PRINTLN,
                descriptor: MethodDescriptor {
                    parameters: vec![FieldType::string()],
                    return_type: None,
                },
            },
        );
        assert_eq!(println.stack_effect(), StackEffect { pops: 2, pushes: 0 });

        let value_of = Instruction::Invoke(
            InvokeType::Static,
            MethodRef {
                class: BinaryName::STRING,
                name: UnqualifiedName::VALUEOF,
                descriptor: MethodDescriptor {
                    parameters: vec![FieldType::object(BinaryName::OBJECT)],
                    return_type: Some(FieldType::string()),
                },
            },
        );
        assert_eq!(value_of.stack_effect(), StackEffect { pops: 1, pushes: 1 });

        let dup: SymbolicInstruction = Instruction::Dup;
        assert_eq!(dup.stack_effect(), StackEffect { pops: 1, pushes: 2 });
    }
}
