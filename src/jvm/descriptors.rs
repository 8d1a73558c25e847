use super::{BinaryName, Name, UnqualifiedName};
use std::io::{Error, ErrorKind, Result};
use std::iter::Peekable;
use std::str::Chars;

/// Utility trait for converting descriptors to their string representations
pub trait RenderDescriptor {
    /// Turn the descriptor into a string
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Write the descriptor to a string
    fn render_to(&self, write_to: &mut String);
}

pub trait ParseDescriptor: Sized {
    /// Parse a descriptor from a string
    fn parse(source: &str) -> Result<Self> {
        let mut chars = source.chars().peekable();
        let ret = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(ret),
            Some(c) => {
                let msg = format!("Unexpected leftover input '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
        }
    }

    /// Read the descriptor from a character buffer
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self>;
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    /// Number of local variable slots (or operand stack entries) a value of this type occupies
    pub fn width(&self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }

    /// Keyword used for the type in Java source
    fn java_keyword(&self) -> &'static str {
        match self {
            BaseType::Byte => "byte",
            BaseType::Char => "char",
            BaseType::Double => "double",
            BaseType::Float => "float",
            BaseType::Int => "int",
            BaseType::Long => "long",
            BaseType::Short => "short",
            BaseType::Boolean => "boolean",
        }
    }

    const ALL: [BaseType; 8] = [
        BaseType::Byte,
        BaseType::Char,
        BaseType::Double,
        BaseType::Float,
        BaseType::Int,
        BaseType::Long,
        BaseType::Short,
        BaseType::Boolean,
    ];
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        let c = match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        };
        write_to.push(c);
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let typ = match source.next() {
            Some('B') => BaseType::Byte,
            Some('C') => BaseType::Char,
            Some('D') => BaseType::Double,
            Some('F') => BaseType::Float,
            Some('I') => BaseType::Int,
            Some('J') => BaseType::Long,
            Some('S') => BaseType::Short,
            Some('Z') => BaseType::Boolean,
            Some(c) => {
                let msg = format!("Invalid base type character '{}'", c);
                return Err(Error::new(ErrorKind::InvalidInput, msg));
            }
            None => {
                let msg = "Missing base type character";
                return Err(Error::new(ErrorKind::UnexpectedEof, msg));
            }
        };
        Ok(typ)
    }
}

impl RenderDescriptor for BinaryName {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('L');
        write_to.push_str(self.as_str());
        write_to.push(';');
    }
}

impl ParseDescriptor for BinaryName {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if let Some('L') = source.next() {
            let mut class_name = String::new();
            loop {
                let c: char = source.next().ok_or_else(|| {
                    let msg = format!("Missing terminator for 'L{}'", class_name);
                    Error::new(ErrorKind::UnexpectedEof, msg)
                })?;
                if c == ';' {
                    return BinaryName::from_string(class_name)
                        .map_err(|msg| Error::new(ErrorKind::InvalidInput, msg));
                }
                class_name.push(c);
            }
        } else {
            Err(Error::new(
                ErrorKind::InvalidInput,
                "Expected object type to start with `L`",
            ))
        }
    }
}

/// Reference type
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum RefType {
    Object(BinaryName),
    Array(Box<FieldType>),
}

impl RefType {
    /// Most dimensions an array type may have
    pub const MAX_ARRAY_DIMENSIONS: usize = 255;
}

impl RenderDescriptor for RefType {
    fn render_to(&self, write_to: &mut String) {
        match self {
            RefType::Object(class) => class.render_to(write_to),
            RefType::Array(element_type) => {
                write_to.push('[');
                element_type.render_to(write_to);
            }
        }
    }
}

impl ParseDescriptor for RefType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.peek().copied() {
            Some('L') => BinaryName::parse_from(source).map(RefType::Object),
            Some('[') => {
                let mut dimensions = 0;
                while source.next_if_eq(&'[').is_some() {
                    dimensions += 1;
                    if dimensions > RefType::MAX_ARRAY_DIMENSIONS {
                        let msg = format!(
                            "Array type has more than {} dimensions",
                            RefType::MAX_ARRAY_DIMENSIONS
                        );
                        return Err(Error::new(ErrorKind::InvalidInput, msg));
                    }
                }
                let mut field_type = FieldType::parse_from(source)?;
                for _ in 1..dimensions {
                    field_type = FieldType::array(field_type);
                }
                Ok(RefType::Array(Box::new(field_type)))
            }
            Some(c) => {
                let msg = format!("Invalid reference type character '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
            None => Err(Error::new(ErrorKind::UnexpectedEof, "Missing field type")),
        }
    }
}

/// Type of a class, instance, or local variable
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType {
    Base(BaseType),
    Ref(RefType),
}

impl FieldType {
    pub fn object(class_name: BinaryName) -> FieldType {
        FieldType::Ref(RefType::Object(class_name))
    }

    pub fn array(element_type: FieldType) -> FieldType {
        FieldType::Ref(RefType::Array(Box::new(element_type)))
    }

    pub const fn int() -> FieldType {
        FieldType::Base(BaseType::Int)
    }

    pub fn string() -> FieldType {
        FieldType::object(BinaryName::STRING)
    }

    pub fn print_stream() -> FieldType {
        FieldType::object(BinaryName::PRINTSTREAM)
    }

    /// Number of local variable slots (or operand stack entries) a value of this type occupies
    pub fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Ref(_) => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Ref(_))
    }

    /// Parse a type as it would be written in Java source (eg. `int`, `String[]`,
    /// `java.io.PrintStream`)
    ///
    /// Class names without a package are assumed to live in `java.lang`.
    pub fn from_java_type(source: &str) -> Result<FieldType> {
        let source = source.trim();
        if let Some(element) = source.strip_suffix("[]") {
            return Ok(FieldType::array(FieldType::from_java_type(element)?));
        }
        if let Some(base_type) = BaseType::ALL.iter().find(|b| b.java_keyword() == source) {
            return Ok(FieldType::Base(*base_type));
        }
        let internal_name = if source.contains('.') {
            source.replace('.', "/")
        } else {
            format!("java/lang/{}", source)
        };
        BinaryName::from_string(internal_name)
            .map(FieldType::object)
            .map_err(|msg| Error::new(ErrorKind::InvalidInput, msg))
    }
}

impl RenderDescriptor for FieldType {
    fn render_to(&self, write_to: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(write_to),
            FieldType::Ref(reference_type) => reference_type.render_to(write_to),
        }
    }
}

impl ParseDescriptor for FieldType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.peek().copied() {
            None => Err(Error::new(ErrorKind::UnexpectedEof, "Missing field type")),
            Some('B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z') => {
                BaseType::parse_from(source).map(FieldType::Base)
            }
            Some('L' | '[') => RefType::parse_from(source).map(FieldType::Ref),
            Some(c) => {
                let msg = format!("Invalid field type character '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
        }
    }
}

/// Signature of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    pub return_type: Option<FieldType>, // `None` is for `void` (ie. no return)
}

impl MethodDescriptor {
    /// Descriptor of a method taking nothing and returning nothing: `()V`
    pub const VOID: MethodDescriptor = MethodDescriptor {
        parameters: vec![],
        return_type: None,
    };

    /// Descriptor of a `main` entry point: `([Ljava/lang/String;)V`
    pub fn main() -> MethodDescriptor {
        MethodDescriptor {
            parameters: vec![FieldType::array(FieldType::string())],
            return_type: None,
        }
    }

    /// Most local variable slots the parameters of a method may take up, including `this`
    pub const MAX_PARAMETER_LENGTH: usize = 255;

    /// Total length of parameters (not the same as the length of the vector), which must be
    /// [`MethodDescriptor::MAX_PARAMETER_LENGTH`] or less for it to be valid
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let this_len = if has_this_param { 1 } else { 0 };
        this_len + self.parameters.iter().map(FieldType::width).sum::<usize>()
    }

    /// Number of operand stack entries the return value occupies
    pub fn return_width(&self) -> usize {
        self.return_type.as_ref().map_or(0, FieldType::width)
    }

    /// Parse a method declaration as it would be written in Java source, minus modifiers
    ///
    /// For example, `void main (String[])` parses into `main` with descriptor
    /// `([Ljava/lang/String;)V`. This is the same syntax `GeneratorAdapter`-style APIs accept.
    pub fn from_java_declaration(source: &str) -> Result<(UnqualifiedName, MethodDescriptor)> {
        let invalid = |msg: &str| {
            let msg = format!("Invalid method declaration '{}': {}", source, msg);
            Error::new(ErrorKind::InvalidInput, msg)
        };

        let (return_type, rest) = source
            .trim()
            .split_once(' ')
            .ok_or_else(|| invalid("missing return type"))?;
        let (name, rest) = rest
            .split_once('(')
            .ok_or_else(|| invalid("missing '('"))?;
        let parameters = rest
            .trim_end()
            .strip_suffix(')')
            .ok_or_else(|| invalid("missing ')'"))?;

        let name = UnqualifiedName::from_string(name.trim().to_owned())
            .map_err(|msg| Error::new(ErrorKind::InvalidInput, msg))?;
        let return_type = match return_type.trim() {
            "void" => None,
            other => Some(FieldType::from_java_type(other)?),
        };
        let parameters = if parameters.trim().is_empty() {
            vec![]
        } else {
            parameters
                .split(',')
                .map(FieldType::from_java_type)
                .collect::<Result<Vec<_>>>()?
        };

        Ok((
            name,
            MethodDescriptor {
                parameters,
                return_type,
            },
        ))
    }
}

impl RenderDescriptor for MethodDescriptor {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(typ) => typ.render_to(write_to),
        };
    }
}

impl ParseDescriptor for MethodDescriptor {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if source.next() != Some('(') {
            let msg = "Expected '(' for method";
            return Err(Error::new(ErrorKind::InvalidInput, msg));
        }

        let mut parameters = vec![];
        loop {
            match source.peek().copied() {
                Some(')') => {
                    source.next();
                    break;
                }
                None => {
                    let msg = "Missing ')' for method";
                    return Err(Error::new(ErrorKind::UnexpectedEof, msg));
                }
                Some(_) => parameters.push(FieldType::parse_from(source)?),
            }
        }

        let return_type = if source.next_if_eq(&'V').is_some() {
            None
        } else {
            Some(FieldType::parse_from(source)?)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}
