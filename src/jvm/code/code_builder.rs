use super::{Instruction, RawInstruction, StackEffect, SymbolicInstruction};
use crate::jvm::class_file::{BytecodeArray, Code, ConstantPool, Serialize};
use crate::jvm::{Error, MethodDescriptor, RenderDescriptor};
use std::convert::TryFrom;

/// Interface for pushing instructions into a method body
///
/// Higher level helpers (see [`super::CodeBuilderExts`]) are written against this trait rather
/// than against [`CodeBuilder`] directly.
pub trait BytecodeBuilder {
    /// Push a new instruction onto the end of the method body
    fn emit(&mut self, insn: SymbolicInstruction) -> Result<(), Error>;

    /// Signature of the method being built
    fn descriptor(&self) -> &MethodDescriptor;

    /// Whether the method being built has no receiver
    fn is_static(&self) -> bool;
}

/// Running and peak depth of the operand stack
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StackDepth {
    current: usize,
    max: usize,
}

impl StackDepth {
    pub fn new() -> StackDepth {
        StackDepth::default()
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Pop then push, updating the peak
    ///
    /// On underflow, the depth is left untouched and the depth before the instruction is
    /// returned.
    pub fn apply(&mut self, effect: StackEffect) -> Result<(), usize> {
        let after_pops = self
            .current
            .checked_sub(effect.pops)
            .ok_or(self.current)?;
        self.current = after_pops + effect.pushes;
        self.max = self.max.max(self.current);
        Ok(())
    }
}

/// Encoded method body, along with its exact stack and locals requirements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    pub max_stack: u16,
    pub max_locals: u16,

    /// Serialized code array
    pub code: Vec<u8>,

    /// Instructions in `code`, in order
    pub instructions: Vec<RawInstruction>,
}

impl MethodBody {
    /// Turn the body into the `Code` attribute for its method
    pub fn into_code(self) -> Code {
        Code {
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code_array: BytecodeArray(self.code),
        }
    }
}

/// Builder for the linear body of a single method
///
/// Instructions are checked and encoded as soon as they are emitted. The builder keeps exact
/// track of how deep the operand stack goes and of which local slots get used, so the resulting
/// `max_stack` and `max_locals` are the true peaks rather than conservative guesses.
///
/// Since none of the supported instructions branch, the stack depth at every offset is known
/// statically and no stack map frames are needed.
pub struct CodeBuilder<'p> {
    /// Constants pool of the enclosing class
    constants: &'p mut ConstantPool,

    /// This method signature
    descriptor: MethodDescriptor,

    is_static: bool,

    /// Serialized instructions so far
    code_array: Vec<u8>,

    /// Instructions so far (matches `code_array`)
    instructions: Vec<RawInstruction>,

    stack: StackDepth,

    /// Number of local slots used so far (starts off covering the parameters)
    max_locals: usize,

    /// Most recently emitted instruction
    last_instruction: Option<SymbolicInstruction>,

    /// Maximums requested through `declare_maxs`
    declared_maxs: Option<(u16, u16)>,
}

impl<'p> CodeBuilder<'p> {
    /// Largest code array the class file format allows
    pub const MAX_CODE_LENGTH: usize = u16::MAX as usize;

    pub fn new(
        constants: &'p mut ConstantPool,
        descriptor: MethodDescriptor,
        is_static: bool,
    ) -> CodeBuilder<'p> {
        let max_locals = descriptor.parameter_length(!is_static);
        CodeBuilder {
            constants,
            descriptor,
            is_static,
            code_array: vec![],
            instructions: vec![],
            stack: StackDepth::new(),
            max_locals,
            last_instruction: None,
            declared_maxs: None,
        }
    }

    /// Get the constant pool
    pub fn constants(&mut self) -> &mut ConstantPool {
        &mut *self.constants
    }

    /// Current depth of the operand stack
    pub fn stack_depth(&self) -> usize {
        self.stack.current()
    }

    pub fn max_stack(&self) -> usize {
        self.stack.max()
    }

    pub fn max_locals(&self) -> usize {
        self.max_locals
    }

    /// Current offset in the code array
    pub fn offset(&self) -> usize {
        self.code_array.len()
    }

    /// Push a new instruction onto the end of the method body
    ///
    /// Nothing is emitted if this fails.
    pub fn emit(&mut self, insn: SymbolicInstruction) -> Result<(), Error> {
        let offset = self.offset();

        if self.last_instruction.as_ref().map_or(false, |last| last.is_terminator()) {
            return Err(Error::UnreachableInstruction {
                instruction: insn.to_string(),
                offset,
            });
        }
        self.check_return(&insn)?;

        let mut stack = self.stack;
        stack
            .apply(insn.stack_effect())
            .map_err(|depth| Error::StackUnderflow {
                instruction: insn.to_string(),
                offset,
                depth,
            })?;

        let raw_insn = self.intern_operands(&insn)?;
        let mut encoded = vec![];
        raw_insn.serialize(&mut encoded).map_err(Error::IoError)?;
        let code_length = offset + encoded.len();
        if code_length > Self::MAX_CODE_LENGTH {
            return Err(Error::MethodCodeOverflow(code_length));
        }

        log::trace!("{:>5}: {} (stack {})", offset, insn, stack.current());
        if let Some(slot) = insn.local_slot() {
            self.reserve_local(slot as u16);
        }
        self.stack = stack;
        self.code_array.extend(encoded);
        self.instructions.push(raw_insn);
        self.last_instruction = Some(insn);
        Ok(())
    }

    /// Mark a local variable slot as used
    pub fn reserve_local(&mut self, slot: u16) {
        self.max_locals = self.max_locals.max(slot as usize + 1);
    }

    /// Explicitly set the stack and locals maximums
    ///
    /// The values must cover what the code actually needs (this is checked when the body is
    /// finished). Over-declaring is fine.
    pub fn declare_maxs(&mut self, max_stack: u16, max_locals: u16) {
        self.declared_maxs = Some((max_stack, max_locals));
    }

    /// Finish the method body
    pub fn result(self) -> Result<MethodBody, Error> {
        match &self.last_instruction {
            Some(insn) if insn.is_terminator() => (),
            last => {
                return Err(Error::UnterminatedMethod {
                    last_instruction: last.as_ref().map(|insn| insn.to_string()),
                })
            }
        }

        let computed_stack = u16::try_from(self.stack.max())
            .map_err(|_| Error::MethodCodeMaxStackOverflow(self.stack.max()))?;
        let computed_locals = u16::try_from(self.max_locals)
            .map_err(|_| Error::MethodCodeMaxLocalsOverflow(self.max_locals))?;

        let (max_stack, max_locals) = match self.declared_maxs {
            None => (computed_stack, computed_locals),
            Some((declared_stack, declared_locals)) => {
                if declared_stack < computed_stack || declared_locals < computed_locals {
                    return Err(Error::DeclaredMaxsTooSmall {
                        declared_stack,
                        declared_locals,
                        computed_stack,
                        computed_locals,
                    });
                }
                (declared_stack, declared_locals)
            }
        };

        Ok(MethodBody {
            max_stack,
            max_locals,
            code: self.code_array,
            instructions: self.instructions,
        })
    }

    fn check_return(&self, insn: &SymbolicInstruction) -> Result<(), Error> {
        let matches_descriptor = match insn {
            Instruction::Return => self.descriptor.return_type.is_none(),
            Instruction::AReturn => self
                .descriptor
                .return_type
                .as_ref()
                .map_or(false, |typ| typ.is_reference()),
            _ => true,
        };
        if matches_descriptor {
            Ok(())
        } else {
            Err(Error::ReturnTypeMismatch {
                instruction: insn.to_string(),
                descriptor: self.descriptor.render(),
            })
        }
    }

    /// Intern every symbolic reference of the instruction in the constant pool
    fn intern_operands(&mut self, insn: &SymbolicInstruction) -> Result<RawInstruction, Error> {
        let constants = &mut *self.constants;
        let raw_insn = match insn {
            Instruction::ALoad(slot) => Instruction::ALoad(*slot),
            Instruction::AStore(slot) => Instruction::AStore(*slot),
            Instruction::Pop => Instruction::Pop,
            Instruction::Dup => Instruction::Dup,
            Instruction::Ldc(string) => Instruction::Ldc(constants.get_string(string)?.into()),
            Instruction::GetStatic(field) => {
                let idx = constants.get_field_ref(&field.class, &field.name, &field.descriptor)?;
                Instruction::GetStatic(idx.into())
            }
            Instruction::Invoke(typ, method) => {
                let idx =
                    constants.get_method_ref(&method.class, &method.name, &method.descriptor)?;
                Instruction::Invoke(*typ, idx.into())
            }
            Instruction::Return => Instruction::Return,
            Instruction::AReturn => Instruction::AReturn,
            Instruction::AThrow => Instruction::AThrow,
        };
        Ok(raw_insn)
    }
}

impl<'p> BytecodeBuilder for CodeBuilder<'p> {
    fn emit(&mut self, insn: SymbolicInstruction) -> Result<(), Error> {
        CodeBuilder::emit(self, insn)
    }

    fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    fn is_static(&self) -> bool {
        self.is_static
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{
        BinaryName, FieldRef, FieldType, InvokeType, MethodRef, UnqualifiedName,
    };

    fn system_out() -> SymbolicInstruction {
        Instruction::GetStatic(FieldRef {
            class: BinaryName::SYSTEM,
            name: UnqualifiedName::OUT,
            descriptor: FieldType::print_stream(),
        })
    }

    fn println() -> SymbolicInstruction {
        Instruction::Invoke(
            InvokeType::Virtual,
            MethodRef {
                class: BinaryName::PRINTSTREAM,
                name: UnqualifiedName::PRINTLN,
                descriptor: MethodDescriptor {
                    parameters: vec![FieldType::string()],
                    return_type: None,
                },
            },
        )
    }

    fn object_init() -> SymbolicInstruction {
        Instruction::Invoke(
            InvokeType::Special,
            MethodRef {
                class: BinaryName::OBJECT,
                name: UnqualifiedName::INIT,
                descriptor: MethodDescriptor::VOID,
            },
        )
    }

    #[test]
    fn hello_world_body() {
        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, MethodDescriptor::main(), true);
        code.emit(system_out()).unwrap();
        code.emit(Instruction::Ldc(String::from("Hello world!"))).unwrap();
        code.emit(println()).unwrap();
        code.emit(Instruction::Return).unwrap();
        let body = code.result().unwrap();

        assert_eq!(body.max_stack, 2);
        assert_eq!(body.max_locals, 1);
        assert_eq!(body.instructions.len(), 4);
        assert_eq!(body.code.len(), 3 + 2 + 3 + 1);
        assert_eq!(body.code[0], 0xB2);
        assert_eq!(body.code[3], 0x12);
        assert_eq!(body.code[8], 0xB1);
    }

    #[test]
    fn constructor_body() {
        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, MethodDescriptor::VOID, false);
        code.emit(Instruction::ALoad(0)).unwrap();
        code.emit(object_init()).unwrap();
        code.emit(Instruction::Return).unwrap();
        let body = code.result().unwrap();

        assert_eq!((body.max_stack, body.max_locals), (1, 1));
        assert_eq!(body.code, vec![0x2A, 0xB7, 0x00, 0x06, 0xB1]);
    }

    #[test]
    fn peak_is_not_final_depth() {
        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, MethodDescriptor::VOID, true);
        code.emit(Instruction::Ldc(String::from("a"))).unwrap();
        code.emit(Instruction::Dup).unwrap();
        code.emit(Instruction::Dup).unwrap();
        code.emit(Instruction::Pop).unwrap();
        code.emit(Instruction::Pop).unwrap();
        code.emit(Instruction::Pop).unwrap();
        code.emit(Instruction::Ldc(String::from("b"))).unwrap();
        code.emit(Instruction::Pop).unwrap();
        assert_eq!(code.stack_depth(), 0);
        code.emit(Instruction::Return).unwrap();
        assert_eq!(code.result().unwrap().max_stack, 3);
    }

    #[test]
    fn underflow_is_reported_at_emission() {
        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, MethodDescriptor::main(), true);
        code.emit(system_out()).unwrap();
        match code.emit(println()) {
            Err(Error::StackUnderflow { offset, depth, .. }) => {
                assert_eq!(offset, 3);
                assert_eq!(depth, 1);
            }
            other => panic!("expected stack underflow, got {:?}", other),
        }

        // The failed instruction left no trace
        assert_eq!(code.offset(), 3);
        assert_eq!(code.stack_depth(), 1);
    }

    #[test]
    fn locals_are_tracked() {
        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, MethodDescriptor::main(), true);
        code.emit(Instruction::ALoad(0)).unwrap();
        code.emit(Instruction::AStore(5)).unwrap();
        code.reserve_local(2);
        code.emit(Instruction::Return).unwrap();
        let body = code.result().unwrap();
        assert_eq!(body.max_locals, 6);
        assert_eq!(body.max_stack, 1);
    }

    #[test]
    fn method_must_terminate() {
        let mut constants = ConstantPool::new();
        let code = CodeBuilder::new(&mut constants, MethodDescriptor::VOID, true);
        assert!(matches!(
            code.result(),
            Err(Error::UnterminatedMethod {
                last_instruction: None
            })
        ));

        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, MethodDescriptor::VOID, false);
        code.emit(Instruction::ALoad(0)).unwrap();
        code.emit(Instruction::Pop).unwrap();
        assert!(matches!(
            code.result(),
            Err(Error::UnterminatedMethod {
                last_instruction: Some(_)
            })
        ));
    }

    #[test]
    fn nothing_after_terminator() {
        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, MethodDescriptor::VOID, true);
        code.emit(Instruction::Return).unwrap();
        assert!(matches!(
            code.emit(Instruction::Return),
            Err(Error::UnreachableInstruction { offset: 1, .. })
        ));
    }

    #[test]
    fn return_must_match_descriptor() {
        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, MethodDescriptor::VOID, false);
        code.emit(Instruction::ALoad(0)).unwrap();
        assert!(matches!(
            code.emit(Instruction::AReturn),
            Err(Error::ReturnTypeMismatch { .. })
        ));

        let returns_string = MethodDescriptor {
            parameters: vec![],
            return_type: Some(FieldType::string()),
        };
        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, returns_string, true);
        assert!(matches!(
            code.emit(Instruction::Return),
            Err(Error::ReturnTypeMismatch { .. })
        ));
        code.emit(Instruction::Ldc(String::from("x"))).unwrap();
        code.emit(Instruction::AReturn).unwrap();
        assert_eq!(code.result().unwrap().max_stack, 1);
    }

    #[test]
    fn declared_maxs() {
        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, MethodDescriptor::main(), true);
        code.emit(system_out()).unwrap();
        code.emit(Instruction::Ldc(String::from("hi"))).unwrap();
        code.emit(println()).unwrap();
        code.emit(Instruction::Return).unwrap();
        code.declare_maxs(2, 2);
        let body = code.result().unwrap();
        assert_eq!((body.max_stack, body.max_locals), (2, 2));

        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, MethodDescriptor::main(), true);
        code.emit(system_out()).unwrap();
        code.emit(Instruction::Ldc(String::from("hi"))).unwrap();
        code.emit(println()).unwrap();
        code.emit(Instruction::Return).unwrap();
        code.declare_maxs(1, 1);
        assert!(matches!(
            code.result(),
            Err(Error::DeclaredMaxsTooSmall {
                computed_stack: 2,
                computed_locals: 1,
                ..
            })
        ));
    }

    #[test]
    fn stack_depth_arithmetic() {
        let mut depth = StackDepth::new();
        depth.apply(StackEffect { pops: 0, pushes: 2 }).unwrap();
        depth.apply(StackEffect { pops: 2, pushes: 1 }).unwrap();
        assert_eq!((depth.current(), depth.max()), (1, 2));
        assert_eq!(depth.apply(StackEffect { pops: 2, pushes: 0 }), Err(1));
        assert_eq!((depth.current(), depth.max()), (1, 2));
    }
}
