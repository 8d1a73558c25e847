use super::interpreter::Interpreter;
use super::{
    read_class, Error, Exception, Host, HostMethod, LinkageError, ParsedConstants, ParsedMethod,
    Value, VerifyErrorKind,
};
use crate::jvm::class_file::Version;
use crate::jvm::{
    BinaryName, ClassAccessFlags, DecodeError, FieldRef, FieldType, Instruction, InvokeType,
    MethodAccessFlags, MethodDescriptor, MethodRef, Name, RawInstruction, RenderDescriptor,
    StackDepth, SymbolicInstruction, UnqualifiedName,
};
use std::collections::HashMap;
use std::rc::Rc;

/// Class defined from bytes, verified and linked against the host
#[derive(Debug)]
pub struct LoadedClass {
    pub name: BinaryName,
    pub super_class: BinaryName,
    pub access_flags: ClassAccessFlags,
    pub version: Version,
    methods: HashMap<(UnqualifiedName, MethodDescriptor), LoadedMethod>,
}

impl LoadedClass {
    pub fn method(
        &self,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Option<&LoadedMethod> {
        self.methods.get(&(name.clone(), descriptor.clone()))
    }

    pub fn methods(&self) -> impl Iterator<Item = &LoadedMethod> {
        self.methods.values()
    }
}

/// Verified method, with its constant pool operands resolved back to symbolic references
#[derive(Debug)]
pub struct LoadedMethod {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub access_flags: MethodAccessFlags,
    pub max_stack: u16,
    pub max_locals: u16,

    /// Empty for methods without code (`native` or `abstract`)
    pub code: Vec<SymbolicInstruction>,
}

impl LoadedMethod {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Name as it appears in error messages (eg. `main([Ljava/lang/String;)V`)
    pub fn display_name(&self) -> String {
        format!("{}{}", self.name, self.descriptor.render())
    }
}

/// Method resolved by a symbolic reference
pub(crate) enum MethodTarget<'a> {
    Host(&'a HostMethod),
    Loaded(&'a LoadedClass, &'a LoadedMethod),
}

impl<'a> MethodTarget<'a> {
    fn is_static(&self) -> bool {
        match self {
            MethodTarget::Host(method) => method.is_static,
            MethodTarget::Loaded(_, method) => method.is_static(),
        }
    }
}

/// Defines classes from bytes and runs their methods
///
/// Classes are linked against the [`Host`] and against classes this loader defined earlier.
/// Everything is checked when the class is loaded, so invoking a method of a loaded class can
/// only fail because of an exception at runtime.
pub struct DynamicLoader {
    host: Host,
    classes: HashMap<BinaryName, Rc<LoadedClass>>,
}

impl DynamicLoader {
    pub fn new(host: Host) -> DynamicLoader {
        DynamicLoader {
            host,
            classes: HashMap::new(),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Class previously loaded by this loader
    pub fn class(&self, name: &BinaryName) -> Option<&Rc<LoadedClass>> {
        self.classes.get(name)
    }

    /// Define, verify, and link a class
    pub fn load(&mut self, bytes: Vec<u8>) -> Result<Rc<LoadedClass>, Error> {
        let parsed = read_class(&bytes)?;
        let class_name = parsed.this_class.clone();
        log::debug!(
            "Loading class {} (version {}.{}, {} bytes)",
            class_name,
            parsed.version.major_version,
            parsed.version.minor_version,
            bytes.len()
        );

        if self.host.class(&class_name).is_some() || self.classes.contains_key(&class_name) {
            return Err(LinkageError::DuplicateClass(class_name.as_str().to_owned()).into());
        }
        // Only `java/lang/Object` has no superclass, and the host always defines it
        let super_class = parsed.super_class.clone().ok_or_else(|| {
            LinkageError::DuplicateClass(class_name.as_str().to_owned())
        })?;
        if !self.class_exists(&super_class) {
            return Err(LinkageError::NoClassDefFound {
                class: super_class.as_str().to_owned(),
                referenced_from: class_name.as_str().to_owned(),
            }
            .into());
        }

        let mut methods = HashMap::new();
        for method in &parsed.methods {
            log::trace!(
                "Verifying {} {}{}",
                method.access_flags.modifiers(),
                method.name,
                method.descriptor.render()
            );
            let loaded = verify_method(&parsed.constants, method).map_err(|kind| {
                Error::Verification {
                    class: class_name.as_str().to_owned(),
                    method: format!("{}{}", method.name, method.descriptor.render()),
                    kind,
                }
            })?;
            let signature = (loaded.name.clone(), loaded.descriptor.clone());
            if methods.insert(signature, loaded).is_some() {
                return Err(Error::ClassFormat(format!(
                    "method {}{} is defined twice",
                    method.name,
                    method.descriptor.render()
                )));
            }
        }

        let class = LoadedClass {
            name: class_name.clone(),
            super_class,
            access_flags: parsed.access_flags,
            version: parsed.version,
            methods,
        };
        self.link(&class)?;

        log::debug!("Loaded class {} with {} methods", class_name, class.methods.len());
        let class = Rc::new(class);
        self.classes.insert(class_name, class.clone());
        Ok(class)
    }

    /// Invoke a static method of a loaded class
    pub fn invoke_entry_point(
        &self,
        class: &LoadedClass,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Error> {
        let method = class
            .method(name, descriptor)
            .filter(|method| method.is_static())
            .ok_or_else(|| LinkageError::NoSuchMethod {
                class: class.name.as_str().to_owned(),
                name: name.as_str().to_owned(),
                descriptor: descriptor.render(),
            })?;
        let method_name = format!("{}.{}", class.name, method.display_name());
        log::debug!("Invoking {}", method_name);

        let check_args = || -> Result<(), Exception> {
            if args.len() != descriptor.parameters.len() {
                return Err(Exception::IllegalArgument(format!(
                    "expected {} arguments, got {}",
                    descriptor.parameters.len(),
                    args.len()
                )));
            }
            for (arg, typ) in args.iter().zip(&descriptor.parameters) {
                if !arg.is_assignable_to(typ) {
                    return Err(Exception::IllegalArgument(format!(
                        "{:?} is not a {}",
                        arg,
                        typ.render()
                    )));
                }
            }
            Ok(())
        };

        check_args()
            .and_then(|()| Interpreter::new(self).invoke(class, method, None, args))
            .map_err(|cause| Error::Invocation {
                method: method_name,
                cause,
            })
    }

    /// Invoke `public static void main(String[] args)` with a `null` argument array
    pub fn invoke_main(&self, class: &LoadedClass) -> Result<(), Error> {
        self.invoke_entry_point(
            class,
            &UnqualifiedName::MAIN,
            &MethodDescriptor::main(),
            vec![Value::Null],
        )?;
        Ok(())
    }

    fn class_exists(&self, name: &BinaryName) -> bool {
        self.host.class(name).is_some() || self.classes.contains_key(name)
    }

    /// Super class of a host class or a loaded class
    fn super_class_of<'a>(
        &'a self,
        pending: Option<&'a LoadedClass>,
        name: &BinaryName,
    ) -> Option<Option<&'a BinaryName>> {
        if let Some(class) = pending.filter(|class| class.name == *name) {
            return Some(Some(&class.super_class));
        }
        if let Some(class) = self.classes.get(name) {
            return Some(Some(&class.super_class));
        }
        self.host.class(name).map(|class| class.super_class.as_ref())
    }

    /// Find a method on a class or one of its superclasses
    pub(crate) fn resolve_method<'a>(
        &'a self,
        pending: Option<&'a LoadedClass>,
        referenced_from: &BinaryName,
        method: &MethodRef,
    ) -> Result<MethodTarget<'a>, LinkageError> {
        let mut current = method.class.clone();
        loop {
            let loaded = match pending.filter(|class| class.name == current) {
                Some(class) => Some(class),
                None => self.classes.get(&current).map(|class| &**class),
            };
            if let Some(class) = loaded {
                if let Some(found) = class.method(&method.name, &method.descriptor) {
                    return Ok(MethodTarget::Loaded(class, found));
                }
            } else if let Some(class) = self.host.class(&current) {
                if let Some(found) = class.method(&method.name, &method.descriptor) {
                    return Ok(MethodTarget::Host(found));
                }
            }

            match self.super_class_of(pending, &current) {
                None => {
                    return Err(LinkageError::NoClassDefFound {
                        class: current.as_str().to_owned(),
                        referenced_from: referenced_from.as_str().to_owned(),
                    })
                }
                Some(None) => {
                    return Err(LinkageError::NoSuchMethod {
                        class: method.class.as_str().to_owned(),
                        name: method.name.as_str().to_owned(),
                        descriptor: method.descriptor.render(),
                    })
                }
                Some(Some(super_class)) => current = super_class.clone(),
            }
        }
    }

    /// Find the value of a static field on a class or one of its superclasses
    pub(crate) fn resolve_static_field(
        &self,
        pending: Option<&LoadedClass>,
        referenced_from: &BinaryName,
        field: &FieldRef,
    ) -> Result<&Value, LinkageError> {
        let mut current = field.class.clone();
        loop {
            if let Some(class) = self.host.class(&current) {
                if let Some(value) = class.static_field(&field.name, &field.descriptor) {
                    return Ok(value);
                }
            }

            match self.super_class_of(pending, &current) {
                None => {
                    return Err(LinkageError::NoClassDefFound {
                        class: current.as_str().to_owned(),
                        referenced_from: referenced_from.as_str().to_owned(),
                    })
                }
                Some(None) => {
                    return Err(LinkageError::NoSuchField {
                        class: field.class.as_str().to_owned(),
                        name: field.name.as_str().to_owned(),
                        descriptor: field.descriptor.render(),
                    })
                }
                Some(Some(super_class)) => current = super_class.clone(),
            }
        }
    }

    /// Resolve every symbolic reference in the code of the class
    fn link(&self, class: &LoadedClass) -> Result<(), LinkageError> {
        for method in class.methods() {
            for insn in &method.code {
                match insn {
                    Instruction::GetStatic(field) => {
                        self.resolve_static_field(Some(class), &class.name, field)?;
                    }
                    Instruction::Invoke(invoke_type, method_ref) => {
                        let target = self.resolve_method(Some(class), &class.name, method_ref)?;
                        let is_static = *invoke_type == InvokeType::Static;
                        if target.is_static() != is_static {
                            return Err(LinkageError::IncompatibleClassChange(format!(
                                "{} of {} method {} from {}.{}",
                                insn,
                                if target.is_static() { "static" } else { "instance" },
                                method_ref,
                                class.name,
                                method.display_name()
                            )));
                        }
                    }
                    _ => (),
                }
            }
        }
        Ok(())
    }
}

/// Decode and check the code of a method
///
/// This replays the same stack accounting as [`crate::jvm::CodeBuilder`], but against the
/// maximums the class file declares.
fn verify_method(
    constants: &ParsedConstants,
    method: &ParsedMethod,
) -> Result<LoadedMethod, VerifyErrorKind> {
    let is_static = method.access_flags.contains(MethodAccessFlags::STATIC);
    let code = match &method.code {
        Some(code) => code,
        None if method.access_flags.has_no_code() => {
            return Ok(LoadedMethod {
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
                access_flags: method.access_flags,
                max_stack: 0,
                max_locals: 0,
                code: vec![],
            })
        }
        None => return Err(VerifyErrorKind::MissingCode),
    };

    let needed = method.descriptor.parameter_length(!is_static);
    if needed > code.max_locals as usize {
        return Err(VerifyErrorKind::ParametersExceedLocals {
            needed,
            max_locals: code.max_locals,
        });
    }

    let bytes: &[u8] = &code.code_array.0;
    let mut reader = bytes;
    let mut stack = StackDepth::new();
    let mut instructions = vec![];
    let mut terminated = false;
    while !reader.is_empty() {
        let offset = bytes.len() - reader.len();
        if terminated {
            return Err(VerifyErrorKind::DeadCode { offset });
        }

        let raw_insn = RawInstruction::decode(&mut reader).map_err(|err| match err {
            DecodeError::UnsupportedOpcode(opcode) => {
                VerifyErrorKind::UnsupportedOpcode { offset, opcode }
            }
            DecodeError::Truncated => VerifyErrorKind::Truncated { offset },
        })?;
        let insn = resolve_operands(constants, &raw_insn, offset)?;

        if let Some(slot) = insn.local_slot() {
            if slot as u16 >= code.max_locals {
                return Err(VerifyErrorKind::LocalOutOfRange {
                    offset,
                    slot,
                    max_locals: code.max_locals,
                });
            }
        }

        let returns_correctly = match &insn {
            Instruction::Return => method.descriptor.return_type.is_none(),
            Instruction::AReturn => method
                .descriptor
                .return_type
                .as_ref()
                .map_or(false, FieldType::is_reference),
            _ => true,
        };
        if !returns_correctly {
            return Err(VerifyErrorKind::ReturnTypeMismatch { offset });
        }

        stack
            .apply(insn.stack_effect())
            .map_err(|depth| VerifyErrorKind::StackUnderflow { offset, depth })?;
        if stack.current() > code.max_stack as usize {
            return Err(VerifyErrorKind::StackOverflow {
                offset,
                max_stack: code.max_stack,
            });
        }

        terminated = insn.is_terminator();
        instructions.push(insn);
    }
    if !terminated {
        return Err(VerifyErrorKind::FallsOffEnd);
    }

    Ok(LoadedMethod {
        name: method.name.clone(),
        descriptor: method.descriptor.clone(),
        access_flags: method.access_flags,
        max_stack: code.max_stack,
        max_locals: code.max_locals,
        code: instructions,
    })
}

/// Replace constant pool indices with what they point to, checking the constant kinds
fn resolve_operands(
    constants: &ParsedConstants,
    raw_insn: &RawInstruction,
    offset: usize,
) -> Result<SymbolicInstruction, VerifyErrorKind> {
    let bad_constant = |index: &crate::jvm::class_file::ConstantIndex, expected| {
        VerifyErrorKind::BadConstant {
            offset,
            index: index.0,
            expected,
        }
    };
    raw_insn.map(
        |idx| {
            constants
                .string(*idx)
                .map(str::to_owned)
                .ok_or_else(|| bad_constant(idx, "string"))
        },
        |idx| {
            constants
                .field_ref(*idx)
                .ok_or_else(|| bad_constant(idx, "field reference"))
        },
        |idx| {
            constants
                .method_ref(*idx)
                .ok_or_else(|| bad_constant(idx, "method reference"))
        },
    )
}
