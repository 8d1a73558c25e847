use crate::jvm::class_file::{ClassConstantIndex, ClassFile, ConstantPool, Method, Version};
use crate::jvm::{
    AssemblyError, BinaryName, ClassAccessFlags, CodeBuilder, CodeBuilderExts, Error,
    MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor, RenderDescriptor, UnqualifiedName,
};
use std::collections::HashSet;

/// Settings for assembling a class
#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    /// Binary name of the class being assembled (eg. `org/example/Example`)
    pub class_name: String,

    /// Binary name of the superclass
    pub super_class: String,

    pub access_flags: ClassAccessFlags,

    /// Class file version to emit
    pub version: Version,
}

impl AssemblerSettings {
    /// Settings for a public class extending `java/lang/Object`
    pub fn new(class_name: impl Into<String>) -> AssemblerSettings {
        AssemblerSettings {
            class_name: class_name.into(),
            super_class: BinaryName::OBJECT.as_str().to_owned(),
            access_flags: ClassAccessFlags::PUBLIC,
            version: Version::default(),
        }
    }

    pub fn with_super_class(mut self, super_class: impl Into<String>) -> AssemblerSettings {
        self.super_class = super_class.into();
        self
    }

    pub fn with_version(mut self, version: Version) -> AssemblerSettings {
        self.version = version;
        self
    }
}

/// Where a [`ClassAssembler`] is in its lifecycle
///
/// ```text
/// Empty ──> HasConstructor ──> HasMethods ──> Finalized
///   └────────────────────────────^
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssemblerState {
    Empty,
    HasConstructor,
    HasMethods,
    Finalized,
}

impl AssemblerState {
    fn name(&self) -> &'static str {
        match self {
            AssemblerState::Empty => "empty",
            AssemblerState::HasConstructor => "holding only a constructor",
            AssemblerState::HasMethods => "holding methods",
            AssemblerState::Finalized => "finalized",
        }
    }
}

/// High level operations for the body of a static method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodOp {
    /// `System.out.println(text)`
    Println(String),

    /// `System.out.print(text)`
    Print(String),

    /// Call a static method taking no arguments and returning nothing
    InvokeStatic { class: String, name: String },
}

/// Assembler for a single class
///
/// The assembler owns the constant pool of the class. Each method body is built with a fresh
/// [`CodeBuilder`] borrowing that pool, then wrapped up as a method with a `Code` attribute.
pub struct ClassAssembler {
    this_class: BinaryName,
    super_class: BinaryName,
    access_flags: ClassAccessFlags,
    version: Version,

    constants: ConstantPool,
    this_class_index: ClassConstantIndex,
    super_class_index: ClassConstantIndex,

    methods: Vec<Method>,

    /// Name and descriptor of every method added so far
    signatures: HashSet<(UnqualifiedName, MethodDescriptor)>,

    has_static_method: bool,
    state: AssemblerState,
}

impl ClassAssembler {
    pub fn new(settings: AssemblerSettings) -> Result<ClassAssembler, Error> {
        let this_class = BinaryName::from_string(settings.class_name)
            .map_err(AssemblyError::InvalidName)?;
        let super_class = BinaryName::from_string(settings.super_class)
            .map_err(AssemblyError::InvalidName)?;

        let mut constants = ConstantPool::new();
        let this_class_index = constants.get_class(&this_class)?;
        let super_class_index = constants.get_class(&super_class)?;

        Ok(ClassAssembler {
            this_class,
            super_class,
            access_flags: settings.access_flags,
            version: settings.version,
            constants,
            this_class_index,
            super_class_index,
            methods: vec![],
            signatures: HashSet::new(),
            has_static_method: false,
            state: AssemblerState::Empty,
        })
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn class_name(&self) -> &BinaryName {
        &self.this_class
    }

    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    /// Add a public no-argument constructor which just chains to the superclass constructor
    pub fn add_default_constructor(&mut self, super_class: &str) -> Result<(), Error> {
        if self.state != AssemblerState::Empty {
            return Err(Error::InvalidState {
                state: self.state.name(),
                operation: "add a default constructor",
            });
        }
        if super_class != self.super_class.as_str() {
            return Err(Error::Assembly(AssemblyError::SuperclassMismatch {
                expected: self.super_class.as_str().to_owned(),
                found: super_class.to_owned(),
            }));
        }

        let super_class = self.super_class.clone();
        self.add_method(
            MethodAccessFlags::PUBLIC,
            UnqualifiedName::INIT,
            MethodDescriptor::VOID,
            |code| {
                code.load_this()?;
                code.invoke_constructor(super_class, MethodDescriptor::VOID)?;
                code.return_value()
            },
        )
    }

    /// Add a public static method whose body is the given operations followed by a return
    ///
    /// The name is an unqualified name (eg. `main`) and the descriptor is a method descriptor
    /// (eg. `([Ljava/lang/String;)V`).
    pub fn add_static_method(
        &mut self,
        name: &str,
        descriptor: &str,
        ops: &[MethodOp],
    ) -> Result<(), Error> {
        self.check_not_finalized("add a static method")?;
        let name =
            UnqualifiedName::from_string(name.to_owned()).map_err(AssemblyError::InvalidName)?;
        let descriptor = MethodDescriptor::parse(descriptor)
            .map_err(|err| Error::BadDescriptor(format!("'{}': {}", descriptor, err)))?;

        self.add_method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            name,
            descriptor,
            |code| {
                for op in ops {
                    match op {
                        MethodOp::Println(text) => code.print_line(text)?,
                        MethodOp::Print(text) => code.print(text)?,
                        MethodOp::InvokeStatic { class, name } => {
                            let class = BinaryName::from_string(class.clone())
                                .map_err(AssemblyError::InvalidName)?;
                            let name = UnqualifiedName::from_string(name.clone())
                                .map_err(AssemblyError::InvalidName)?;
                            code.invoke_static(class, name, MethodDescriptor::VOID)?;
                        }
                    }
                }
                code.return_value()
            },
        )
    }

    /// Add a method whose body is emitted by a callback
    ///
    /// If the callback (or finishing the body) fails, the class is left exactly as it was before
    /// the call, including its constant pool.
    pub fn add_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        build_body: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
    ) -> Result<(), Error> {
        self.check_not_finalized("add a method")?;
        let signature = (name, descriptor);
        if self.signatures.contains(&signature) {
            let (name, descriptor) = signature;
            return Err(Error::Assembly(AssemblyError::DuplicateMethod {
                name: name.as_str().to_owned(),
                descriptor: descriptor.render(),
            }));
        }
        let (name, descriptor) = signature;

        let is_static = access_flags.contains(MethodAccessFlags::STATIC);
        let parameter_length = descriptor.parameter_length(!is_static);
        if parameter_length > MethodDescriptor::MAX_PARAMETER_LENGTH {
            return Err(Error::BadDescriptor(format!(
                "'{}' takes {} parameter slots, more than the {} allowed",
                descriptor.render(),
                parameter_length,
                MethodDescriptor::MAX_PARAMETER_LENGTH
            )));
        }

        let pool_len = self.constants.len();
        match self.build_method(access_flags, &name, &descriptor, is_static, build_body) {
            Ok(method) => {
                log::debug!(
                    "Added {} method {}{} to {}",
                    access_flags.modifiers(),
                    name,
                    descriptor.render(),
                    self.this_class
                );
                self.methods.push(method);
            }
            Err(err) => {
                log::debug!("Failed to add method {}: {}", name, err);
                self.constants.truncate(pool_len);
                return Err(err);
            }
        }

        self.state = match self.state {
            AssemblerState::Empty if name == UnqualifiedName::INIT => {
                AssemblerState::HasConstructor
            }
            _ => AssemblerState::HasMethods,
        };
        self.has_static_method |= is_static;
        self.signatures.insert((name, descriptor));
        Ok(())
    }

    fn build_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
        is_static: bool,
        build_body: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
    ) -> Result<Method, Error> {
        let mut code = CodeBuilder::new(&mut self.constants, descriptor.clone(), is_static);
        build_body(&mut code)?;
        let body = code.result()?;

        let name_index = self.constants.get_utf8(name.as_str())?;
        let descriptor_index = self.constants.get_utf8(descriptor.render())?;
        let code_attribute = self.constants.get_attribute(body.into_code())?;
        Ok(Method {
            access_flags,
            name_index,
            descriptor_index,
            attributes: vec![code_attribute],
        })
    }

    /// Finish the class and produce its class file
    pub fn finish_class_file(&mut self) -> Result<ClassFile, Error> {
        match self.state {
            AssemblerState::Finalized => {
                return Err(Error::InvalidState {
                    state: self.state.name(),
                    operation: "finish the class",
                })
            }
            AssemblerState::Empty => return Err(Error::Assembly(AssemblyError::NoMethods)),
            _ if !self.has_static_method => {
                return Err(Error::Assembly(AssemblyError::NoStaticMethods))
            }
            _ => (),
        }

        self.state = AssemblerState::Finalized;
        Ok(ClassFile {
            version: self.version,
            constants: std::mem::take(&mut self.constants),
            access_flags: self.access_flags,
            this_class: self.this_class_index,
            super_class: self.super_class_index,
            methods: std::mem::take(&mut self.methods),
        })
    }

    /// Finish the class and serialize it
    pub fn finish(&mut self) -> Result<Vec<u8>, Error> {
        let class_file = self.finish_class_file()?;
        let bytes = class_file.to_bytes().map_err(Error::IoError)?;
        log::debug!(
            "Finished class {} ({} methods, {} constants, {} bytes)",
            self.this_class,
            class_file.methods.len(),
            class_file.constants.len(),
            bytes.len()
        );
        Ok(bytes)
    }

    fn check_not_finalized(&self, operation: &'static str) -> Result<(), Error> {
        if self.state == AssemblerState::Finalized {
            Err(Error::InvalidState {
                state: self.state.name(),
                operation,
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::Constant;

    fn hello_ops() -> Vec<MethodOp> {
        vec![MethodOp::Println(String::from("Hello world!"))]
    }

    #[test]
    fn hello_world_class() {
        let mut assembler = ClassAssembler::new(AssemblerSettings::new("Example")).unwrap();
        assert_eq!(assembler.state(), AssemblerState::Empty);
        assembler
            .add_default_constructor("java/lang/Object")
            .unwrap();
        assert_eq!(assembler.state(), AssemblerState::HasConstructor);
        assembler
            .add_static_method("main", "([Ljava/lang/String;)V", &hello_ops())
            .unwrap();
        assert_eq!(assembler.state(), AssemblerState::HasMethods);
        let bytes = assembler.finish().unwrap();
        assert_eq!(assembler.state(), AssemblerState::Finalized);

        assert_eq!(&bytes[0..4], &ClassFile::MAGIC);
        assert_eq!(&bytes[4..8], &[0, 3, 0, 45]);

        // access flags, this, super, no interfaces, no fields, two methods ... no attributes
        assert_eq!(&bytes[bytes.len() - 2..], &[0, 0]);
    }

    #[test]
    fn explicit_version() {
        let settings = AssemblerSettings::new("Example").with_version(Version::JAVA8);
        let mut assembler = ClassAssembler::new(settings).unwrap();
        assembler
            .add_static_method("main", "([Ljava/lang/String;)V", &hello_ops())
            .unwrap();
        let bytes = assembler.finish().unwrap();
        assert_eq!(&bytes[4..8], &[0, 0, 0, 52]);
    }

    #[test]
    fn finish_needs_methods() {
        let mut assembler = ClassAssembler::new(AssemblerSettings::new("Example")).unwrap();
        assert!(matches!(
            assembler.finish(),
            Err(Error::Assembly(AssemblyError::NoMethods))
        ));

        assembler
            .add_default_constructor("java/lang/Object")
            .unwrap();
        assert!(matches!(
            assembler.finish(),
            Err(Error::Assembly(AssemblyError::NoStaticMethods))
        ));
    }

    #[test]
    fn nothing_after_finish() {
        let mut assembler = ClassAssembler::new(AssemblerSettings::new("Example")).unwrap();
        assembler
            .add_static_method("main", "([Ljava/lang/String;)V", &hello_ops())
            .unwrap();
        assembler.finish().unwrap();

        assert!(matches!(
            assembler.add_static_method("other", "()V", &[]),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            assembler.add_default_constructor("java/lang/Object"),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            assembler.finish(),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn constructor_is_optional_but_unique() {
        let mut assembler = ClassAssembler::new(AssemblerSettings::new("Example")).unwrap();
        assembler
            .add_static_method("main", "([Ljava/lang/String;)V", &hello_ops())
            .unwrap();
        assert!(matches!(
            assembler.add_default_constructor("java/lang/Object"),
            Err(Error::InvalidState { .. })
        ));
        assert!(assembler.finish().is_ok());
    }

    #[test]
    fn constructor_must_chain_to_superclass() {
        let mut assembler = ClassAssembler::new(AssemblerSettings::new("Example")).unwrap();
        assert!(matches!(
            assembler.add_default_constructor("java/lang/String"),
            Err(Error::Assembly(AssemblyError::SuperclassMismatch { .. }))
        ));
        assert_eq!(assembler.state(), AssemblerState::Empty);
    }

    #[test]
    fn duplicate_methods() {
        let mut assembler = ClassAssembler::new(AssemblerSettings::new("Example")).unwrap();
        assembler.add_static_method("run", "()V", &[]).unwrap();
        assert!(matches!(
            assembler.add_static_method("run", "()V", &[]),
            Err(Error::Assembly(AssemblyError::DuplicateMethod { .. }))
        ));

        // Same name, different descriptor is an overload
        assembler
            .add_static_method("run", "([Ljava/lang/String;)V", &[])
            .unwrap();
    }

    #[test]
    fn invalid_names_and_descriptors() {
        assert!(matches!(
            ClassAssembler::new(AssemblerSettings::new("java.lang.Example")),
            Err(Error::Assembly(AssemblyError::InvalidName(_)))
        ));

        let mut assembler = ClassAssembler::new(AssemblerSettings::new("Example")).unwrap();
        assert!(matches!(
            assembler.add_static_method("<main>", "()V", &[]),
            Err(Error::Assembly(AssemblyError::InvalidName(_)))
        ));
        assert!(matches!(
            assembler.add_static_method("main", "(V", &[]),
            Err(Error::BadDescriptor(_))
        ));
    }

    #[test]
    fn parameter_slots_are_limited() {
        let mut assembler = ClassAssembler::new(AssemblerSettings::new("Example")).unwrap();
        let longs = |count: usize| format!("({})V", "J".repeat(count));

        assembler
            .add_static_method("widest", &longs(127), &[])
            .unwrap();
        assert!(matches!(
            assembler.add_static_method("wide", &longs(128), &[]),
            Err(Error::BadDescriptor(_))
        ));
        assert!(matches!(
            assembler.add_static_method("wider", &longs(200), &[]),
            Err(Error::BadDescriptor(_))
        ));

        // `this` takes up a slot too
        let ints = MethodDescriptor::parse(&format!("({})V", "I".repeat(255))).unwrap();
        let result = assembler.add_method(
            MethodAccessFlags::PUBLIC,
            UnqualifiedName::from_string(String::from("wide")).unwrap(),
            ints,
            |_| panic!("body of a method with too many parameters"),
        );
        assert!(matches!(result, Err(Error::BadDescriptor(_))));
        assert_eq!(assembler.methods.len(), 1);
    }

    #[test]
    fn failed_methods_leave_no_trace() {
        let mut assembler = ClassAssembler::new(AssemblerSettings::new("Example")).unwrap();
        let pool_len = assembler.constants().len();

        // Returning a `String` from a body that never pushes one
        let result = assembler.add_static_method(
            "greeting",
            "()Ljava/lang/String;",
            &[MethodOp::Println(String::from("unused"))],
        );
        assert!(matches!(result, Err(Error::StackUnderflow { .. })));
        assert_eq!(assembler.constants().len(), pool_len);
        assert_eq!(assembler.state(), AssemblerState::Empty);
        assert!(assembler
            .constants()
            .iter()
            .all(|(_, constant)| *constant != Constant::Utf8(String::from("unused"))));
    }

    #[test]
    fn static_calls_and_low_level_bodies() {
        let mut assembler = ClassAssembler::new(AssemblerSettings::new("Example")).unwrap();
        assembler
            .add_static_method(
                "greet",
                "()V",
                &[
                    MethodOp::Print(String::from("Hello ")),
                    MethodOp::Println(String::from("world!")),
                ],
            )
            .unwrap();
        assembler
            .add_method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                UnqualifiedName::MAIN,
                MethodDescriptor::main(),
                |code| {
                    code.invoke_static(
                        BinaryName::from_string(String::from("Example")).unwrap(),
                        UnqualifiedName::from_string(String::from("greet")).unwrap(),
                        MethodDescriptor::VOID,
                    )?;
                    code.declare_maxs(0, 1);
                    code.return_value()
                },
            )
            .unwrap();
        assert!(assembler.finish().is_ok());
    }
}
