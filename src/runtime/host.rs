use super::{Exception, LinkageError, PrintStream, Sink, Value};
use crate::jvm::{
    BinaryName, FieldType, MethodDescriptor, Name, ParseDescriptor, UnqualifiedName,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

/// Implementation of a host method
///
/// The receiver is `None` for static methods. It is never a null value: the interpreter raises
/// the `NullPointerException` before getting here.
pub type NativeMethod = fn(Option<&Value>, &[Value]) -> Result<Option<Value>, Exception>;

/// Method implemented by the host
#[derive(Clone)]
pub struct HostMethod {
    pub is_static: bool,
    pub implementation: NativeMethod,
}

/// Class which is already loaded in the host before any generated class shows up
pub struct HostClass {
    pub name: BinaryName,

    /// Only `None` for `java/lang/Object`
    pub super_class: Option<BinaryName>,

    methods: HashMap<(UnqualifiedName, MethodDescriptor), HostMethod>,
    static_fields: HashMap<(UnqualifiedName, FieldType), Value>,
}

impl HostClass {
    pub fn new(name: BinaryName, super_class: Option<BinaryName>) -> HostClass {
        HostClass {
            name,
            super_class,
            methods: HashMap::new(),
            static_fields: HashMap::new(),
        }
    }

    /// Add a method, given its name and descriptor (eg. `println` and `(Ljava/lang/String;)V`)
    pub fn with_method(
        mut self,
        name: UnqualifiedName,
        descriptor: &str,
        is_static: bool,
        implementation: NativeMethod,
    ) -> io::Result<HostClass> {
        let descriptor = MethodDescriptor::parse(descriptor)?;
        self.methods.insert(
            (name, descriptor),
            HostMethod {
                is_static,
                implementation,
            },
        );
        Ok(self)
    }

    pub fn with_static_field(
        mut self,
        name: UnqualifiedName,
        descriptor: FieldType,
        value: Value,
    ) -> HostClass {
        self.static_fields.insert((name, descriptor), value);
        self
    }

    /// Method declared directly on this class
    pub fn method(
        &self,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Option<&HostMethod> {
        self.methods.get(&(name.clone(), descriptor.clone()))
    }

    /// Static field declared directly on this class
    pub fn static_field(&self, name: &UnqualifiedName, descriptor: &FieldType) -> Option<&Value> {
        self.static_fields.get(&(name.clone(), descriptor.clone()))
    }
}

/// The host runtime: classes that generated code can link against
///
/// A fresh host knows about a small slice of the Java standard library:
///
///   * `java/lang/Object` (constructor and `toString`)
///   * `java/lang/System` (the `out` and `err` streams)
///   * `java/io/PrintStream` (`print`, `println`, and `flush`)
///   * `java/lang/String` (`valueOf` and `concat`)
///
/// More classes can be added with [`Host::define`].
pub struct Host {
    classes: HashMap<BinaryName, HostClass>,
}

impl Host {
    /// Make a host whose `System.out` and `System.err` write to the given sinks
    pub fn new(stdout: Sink, stderr: Sink) -> io::Result<Host> {
        let mut host = Host {
            classes: HashMap::new(),
        };
        for class in lang_classes(stdout, stderr)? {
            host.classes.insert(class.name.clone(), class);
        }
        Ok(host)
    }

    /// Make a host whose `System.out` and `System.err` are the process' standard streams
    pub fn with_stdio() -> io::Result<Host> {
        Host::new(
            Rc::new(RefCell::new(io::stdout())),
            Rc::new(RefCell::new(io::stderr())),
        )
    }

    /// Add another host class
    pub fn define(&mut self, class: HostClass) -> Result<(), LinkageError> {
        if self.classes.contains_key(&class.name) {
            return Err(LinkageError::DuplicateClass(class.name.as_str().to_owned()));
        }
        log::debug!("Defined host class {}", class.name);
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    pub fn class(&self, name: &BinaryName) -> Option<&HostClass> {
        self.classes.get(name)
    }
}

fn lang_classes(stdout: Sink, stderr: Sink) -> io::Result<Vec<HostClass>> {
    let object = HostClass::new(BinaryName::OBJECT, None)
        .with_method(UnqualifiedName::INIT, "()V", false, |_, _| Ok(None))?
        .with_method(
            UnqualifiedName::TOSTRING,
            "()Ljava/lang/String;",
            false,
            |this, _| Ok(this.map(|this| Value::string(&this.to_string()))),
        )?;

    let system = HostClass::new(BinaryName::SYSTEM, Some(BinaryName::OBJECT))
        .with_static_field(
            UnqualifiedName::OUT,
            FieldType::print_stream(),
            Value::PrintStream(Rc::new(PrintStream::new(stdout))),
        )
        .with_static_field(
            UnqualifiedName::ERR,
            FieldType::print_stream(),
            Value::PrintStream(Rc::new(PrintStream::new(stderr))),
        );

    let printstream = HostClass::new(BinaryName::PRINTSTREAM, Some(BinaryName::OBJECT))
        .with_method(UnqualifiedName::PRINTLN, "(Ljava/lang/String;)V", false, println)?
        .with_method(UnqualifiedName::PRINTLN, "(Ljava/lang/Object;)V", false, println)?
        .with_method(UnqualifiedName::PRINTLN, "()V", false, println)?
        .with_method(UnqualifiedName::PRINT, "(Ljava/lang/String;)V", false, print)?
        .with_method(UnqualifiedName::PRINT, "(Ljava/lang/Object;)V", false, print)?
        .with_method(UnqualifiedName::FLUSH, "()V", false, |this, _| {
            print_stream(this)?.flush()?;
            Ok(None)
        })?;

    let string = HostClass::new(BinaryName::STRING, Some(BinaryName::OBJECT))
        .with_method(
            UnqualifiedName::VALUEOF,
            "(Ljava/lang/Object;)Ljava/lang/String;",
            true,
            |_, args| Ok(Some(Value::string(&argument(args, 0)?.to_string()))),
        )?
        .with_method(
            UnqualifiedName::CONCAT,
            "(Ljava/lang/String;)Ljava/lang/String;",
            false,
            |this, args| {
                let suffix = match argument(args, 0)? {
                    Value::Null => {
                        return Err(Exception::NullPointer(String::from("concat of null")))
                    }
                    other => other.to_string(),
                };
                let prefix = this.map(Value::to_string).unwrap_or_default();
                Ok(Some(Value::string(&(prefix + &suffix))))
            },
        )?;

    Ok(vec![object, system, printstream, string])
}

fn print_stream(this: Option<&Value>) -> Result<&PrintStream, Exception> {
    match this {
        Some(Value::PrintStream(stream)) => Ok(&**stream),
        other => Err(Exception::IllegalArgument(format!(
            "expected a PrintStream receiver, got {:?}",
            other
        ))),
    }
}

fn argument(args: &[Value], index: usize) -> Result<&Value, Exception> {
    args.get(index).ok_or_else(|| {
        Exception::IllegalArgument(format!("missing argument {} of {}", index, args.len()))
    })
}

fn print(this: Option<&Value>, args: &[Value]) -> Result<Option<Value>, Exception> {
    print_stream(this)?.write_str(&argument(args, 0)?.to_string())?;
    Ok(None)
}

fn println(this: Option<&Value>, args: &[Value]) -> Result<Option<Value>, Exception> {
    let stream = print_stream(this)?;
    if let Some(arg) = args.first() {
        stream.write_str(&arg.to_string())?;
    }
    stream.write_str("\n")?;
    Ok(None)
}

#[cfg(test)]
mod test {
    use super::*;

    fn host_with_buffer() -> (Host, Rc<RefCell<Vec<u8>>>) {
        let out = Rc::new(RefCell::new(vec![]));
        let err = Rc::new(RefCell::new(vec![]));
        (Host::new(out.clone(), err).unwrap(), out)
    }

    fn string_method(name: UnqualifiedName, descriptor: &str) -> (UnqualifiedName, MethodDescriptor) {
        (name, MethodDescriptor::parse(descriptor).unwrap())
    }

    #[test]
    fn system_out_prints_to_sink() {
        let (host, out) = host_with_buffer();
        let system = host.class(&BinaryName::SYSTEM).unwrap();
        let stream = system
            .static_field(&UnqualifiedName::OUT, &FieldType::print_stream())
            .unwrap()
            .clone();

        let printstream = host.class(&BinaryName::PRINTSTREAM).unwrap();
        let (name, descriptor) = string_method(UnqualifiedName::PRINTLN, "(Ljava/lang/String;)V");
        let method = printstream.method(&name, &descriptor).unwrap();
        assert!(!method.is_static);
        (method.implementation)(Some(&stream), &[Value::string("Hello world!")]).unwrap();
        (method.implementation)(Some(&stream), &[Value::Null]).unwrap();

        assert_eq!(&*out.borrow(), b"Hello world!\nnull\n");
    }

    #[test]
    fn string_methods() {
        let (host, _) = host_with_buffer();
        let string = host.class(&BinaryName::STRING).unwrap();

        let (name, descriptor) = string_method(
            UnqualifiedName::VALUEOF,
            "(Ljava/lang/Object;)Ljava/lang/String;",
        );
        let value_of = string.method(&name, &descriptor).unwrap();
        assert!(value_of.is_static);
        let result = (value_of.implementation)(None, &[Value::Null]).unwrap();
        assert_eq!(result.unwrap().to_string(), "null");

        let (name, descriptor) = string_method(
            UnqualifiedName::CONCAT,
            "(Ljava/lang/String;)Ljava/lang/String;",
        );
        let concat = string.method(&name, &descriptor).unwrap();
        let result =
            (concat.implementation)(Some(&Value::string("foo")), &[Value::string("bar")]).unwrap();
        assert_eq!(result.unwrap().to_string(), "foobar");
        assert!(matches!(
            (concat.implementation)(Some(&Value::string("foo")), &[Value::Null]),
            Err(Exception::NullPointer(_))
        ));
    }

    #[test]
    fn defining_classes() {
        let (mut host, _) = host_with_buffer();
        let name = BinaryName::from_string(String::from("org/example/Util")).unwrap();
        host.define(HostClass::new(name.clone(), Some(BinaryName::OBJECT)))
            .unwrap();
        assert!(host.class(&name).is_some());
        assert_eq!(
            host.define(HostClass::new(BinaryName::OBJECT, None)),
            Err(LinkageError::DuplicateClass(String::from("java/lang/Object")))
        );
    }

    #[test]
    fn object_methods() {
        let (host, _) = host_with_buffer();
        let object = host.class(&BinaryName::OBJECT).unwrap();
        assert!(object.super_class.is_none());
        assert!(object
            .method(&UnqualifiedName::INIT, &MethodDescriptor::VOID)
            .is_some());

        let (name, descriptor) = string_method(UnqualifiedName::TOSTRING, "()Ljava/lang/String;");
        let to_string = object.method(&name, &descriptor).unwrap();
        let result = (to_string.implementation)(Some(&Value::string("self")), &[]).unwrap();
        assert_eq!(result.unwrap().to_string(), "self");
    }
}
