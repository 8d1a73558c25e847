use crate::jvm::{BinaryName, FieldType, RefType};
use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

/// Output sink shared between the host and whoever wants to inspect what got printed
pub type Sink = Rc<RefCell<dyn Write>>;

/// Runtime values
///
/// Only reference values exist, since none of the supported instructions produce primitives.
#[derive(Clone)]
pub enum Value {
    Null,
    String(Rc<str>),
    PrintStream(Rc<PrintStream>),
    Array(Rc<Vec<Value>>),
}

/// `java.io.PrintStream` writing to a host sink
pub struct PrintStream {
    sink: Sink,
}

impl PrintStream {
    pub fn new(sink: Sink) -> PrintStream {
        PrintStream { sink }
    }

    pub fn write_str(&self, text: &str) -> std::io::Result<()> {
        self.sink.borrow_mut().write_all(text.as_bytes())
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.sink.borrow_mut().flush()
    }
}

impl Value {
    pub fn string(text: &str) -> Value {
        Value::String(Rc::from(text))
    }

    /// Array of strings, as passed to `main`
    pub fn string_array<S: AsRef<str>>(strings: &[S]) -> Value {
        let elements = strings.iter().map(|s| Value::string(s.as_ref())).collect();
        Value::Array(Rc::new(elements))
    }

    /// Could this value be stored in a variable of the given type?
    pub fn is_assignable_to(&self, typ: &FieldType) -> bool {
        let ref_type = match typ {
            FieldType::Base(_) => return false,
            FieldType::Ref(ref_type) => ref_type,
        };
        match (self, ref_type) {
            (Value::Null, _) => true,
            (_, RefType::Object(class)) if *class == BinaryName::OBJECT => true,
            (Value::String(_), RefType::Object(class)) => *class == BinaryName::STRING,
            (Value::PrintStream(_), RefType::Object(class)) => *class == BinaryName::PRINTSTREAM,
            (Value::Array(elements), RefType::Array(element_type)) => elements
                .iter()
                .all(|element| element.is_assignable_to(element_type)),
            _ => false,
        }
    }
}

/// Mirrors `String.valueOf(Object)`
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::String(string) => f.write_str(string),
            Value::PrintStream(stream) => {
                write!(f, "java.io.PrintStream@{:x}", Rc::as_ptr(stream) as *const () as usize)
            }
            Value::Array(elements) => {
                write!(f, "[Ljava.lang.Object;@{:x}", Rc::as_ptr(elements) as *const () as usize)
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::String(string) => f.debug_tuple("String").field(string).finish(),
            Value::PrintStream(_) => f.write_str("PrintStream"),
            Value::Array(elements) => f.debug_tuple("Array").field(elements).finish(),
        }
    }
}
