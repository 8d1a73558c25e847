use super::{BytecodeBuilder, FieldRef, Instruction, InvokeType, MethodRef};
use crate::jvm::{BinaryName, Error, FieldType, MethodDescriptor, Name, UnqualifiedName};

/// Higher level helpers for emitting common instruction sequences
///
/// These mirror what a "generator adapter" offers on top of a raw method visitor: methods are
/// looked up by owner, name, and descriptor rather than by constant pool entries, and the right
/// return instruction is picked from the method signature.
pub trait CodeBuilderExts: BytecodeBuilder {
    /// Push the receiver onto the stack
    fn load_this(&mut self) -> Result<(), Error> {
        if self.is_static() {
            return Err(Error::NoReceiver);
        }
        self.emit(Instruction::ALoad(0))
    }

    /// Invoke a constructor on the object on top of the stack
    fn invoke_constructor(
        &mut self,
        class: BinaryName,
        descriptor: MethodDescriptor,
    ) -> Result<(), Error> {
        self.emit(Instruction::Invoke(
            InvokeType::Special,
            MethodRef {
                class,
                name: UnqualifiedName::INIT,
                descriptor,
            },
        ))
    }

    /// Push the value of a static field
    fn get_static(
        &mut self,
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: FieldType,
    ) -> Result<(), Error> {
        self.emit(Instruction::GetStatic(FieldRef {
            class,
            name,
            descriptor,
        }))
    }

    /// Push a string constant
    fn push_string(&mut self, string: impl Into<String>) -> Result<(), Error> {
        self.emit(Instruction::Ldc(string.into()))
    }

    fn invoke_virtual(
        &mut self,
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
    ) -> Result<(), Error> {
        self.emit(Instruction::Invoke(
            InvokeType::Virtual,
            MethodRef {
                class,
                name,
                descriptor,
            },
        ))
    }

    fn invoke_static(
        &mut self,
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
    ) -> Result<(), Error> {
        self.emit(Instruction::Invoke(
            InvokeType::Static,
            MethodRef {
                class,
                name,
                descriptor,
            },
        ))
    }

    /// Invoke a method given its Java-style declaration (eg. `void println (String)`)
    fn invoke_declared(
        &mut self,
        invoke_type: InvokeType,
        class: BinaryName,
        declaration: &str,
    ) -> Result<(), Error> {
        let (name, descriptor) = MethodDescriptor::from_java_declaration(declaration)
            .map_err(|err| Error::BadDescriptor(err.to_string()))?;
        self.emit(Instruction::Invoke(
            invoke_type,
            MethodRef {
                class,
                name,
                descriptor,
            },
        ))
    }

    /// Return from the method, using the return instruction matching its descriptor
    fn return_value(&mut self) -> Result<(), Error> {
        let insn = match &self.descriptor().return_type {
            None => Instruction::Return,
            Some(FieldType::Ref(_)) => Instruction::AReturn,
            Some(other) => {
                return Err(Error::BadDescriptor(format!(
                    "cannot return primitive {:?}",
                    other
                )))
            }
        };
        self.emit(insn)
    }

    /// Print a string on `System.out`, followed by a newline
    fn print_line(&mut self, message: &str) -> Result<(), Error> {
        self.print_with(UnqualifiedName::PRINTLN, message)
    }

    /// Print a string on `System.out`
    fn print(&mut self, message: &str) -> Result<(), Error> {
        self.print_with(UnqualifiedName::PRINT, message)
    }

    #[doc(hidden)]
    fn print_with(&mut self, method: UnqualifiedName, message: &str) -> Result<(), Error> {
        log::trace!("printing {:?} with {}", message, method.as_str());
        self.get_static(
            BinaryName::SYSTEM,
            UnqualifiedName::OUT,
            FieldType::print_stream(),
        )?;
        self.push_string(message)?;
        self.invoke_virtual(
            BinaryName::PRINTSTREAM,
            method,
            MethodDescriptor {
                parameters: vec![FieldType::string()],
                return_type: None,
            },
        )
    }
}

impl<B: BytecodeBuilder> CodeBuilderExts for B {}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantPool;
    use crate::jvm::CodeBuilder;

    #[test]
    fn adapter_matches_raw_instructions() {
        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, MethodDescriptor::VOID, false);
        code.load_this().unwrap();
        code.invoke_constructor(BinaryName::OBJECT, MethodDescriptor::VOID)
            .unwrap();
        code.return_value().unwrap();
        let body = code.result().unwrap();
        assert_eq!(body.code, vec![0x2A, 0xB7, 0x00, 0x06, 0xB1]);
        assert_eq!((body.max_stack, body.max_locals), (1, 1));
    }

    #[test]
    fn static_methods_have_no_receiver() {
        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, MethodDescriptor::main(), true);
        assert!(matches!(code.load_this(), Err(Error::NoReceiver)));
    }

    #[test]
    fn print_line_and_declared_invocations() {
        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, MethodDescriptor::main(), true);
        code.print_line("hi").unwrap();
        code.get_static(
            BinaryName::SYSTEM,
            UnqualifiedName::OUT,
            FieldType::print_stream(),
        )
        .unwrap();
        code.push_string("there").unwrap();
        code.invoke_declared(
            InvokeType::Virtual,
            BinaryName::PRINTSTREAM,
            "void println (String)",
        )
        .unwrap();
        code.return_value().unwrap();
        let body = code.result().unwrap();
        assert_eq!(body.max_stack, 2);
        assert_eq!(body.instructions.len(), 7);

        // Both `println` calls share one method reference
        assert_eq!(body.instructions[2], body.instructions[5]);
    }

    #[test]
    fn primitive_returns_are_unsupported() {
        let returns_int = MethodDescriptor {
            parameters: vec![],
            return_type: Some(FieldType::int()),
        };
        let mut constants = ConstantPool::new();
        let mut code = CodeBuilder::new(&mut constants, returns_int, true);
        assert!(matches!(code.return_value(), Err(Error::BadDescriptor(_))));
    }
}
