use super::Error;
use crate::jvm::class_file::{
    decode_modified_utf8, BytecodeArray, ClassConstantIndex, ClassFile, Code, Constant,
    ConstantIndex, NameAndTypeConstantIndex, Utf8ConstantIndex, Version,
};
use crate::jvm::{
    BinaryName, ClassAccessFlags, FieldRef, FieldType, MethodAccessFlags, MethodDescriptor,
    MethodRef, Name, ParseDescriptor, RenderDescriptor, UnqualifiedName,
};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;

/// Class file, as read back from bytes
///
/// Symbolic information needed to link the class (names, descriptors) is decoded eagerly, but
/// method code is left as raw bytes for the verifier.
#[derive(Debug)]
pub struct ParsedClass {
    pub version: Version,
    pub constants: ParsedConstants,
    pub access_flags: ClassAccessFlags,
    pub this_class: BinaryName,

    /// Only `None` for `java/lang/Object`
    pub super_class: Option<BinaryName>,

    pub methods: Vec<ParsedMethod>,
}

#[derive(Debug)]
pub struct ParsedMethod {
    pub access_flags: MethodAccessFlags,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub code: Option<Code>,
}

/// Constant pool, as read back from bytes
///
/// Unlike [`crate::jvm::class_file::ConstantPool`], this does not deduplicate: entries stay at
/// exactly the index the class file put them at.
#[derive(Debug, Default)]
pub struct ParsedConstants(Vec<Constant>);

impl ParsedConstants {
    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        let offset = (index.0 as usize).checked_sub(1)?;
        self.0.get(offset)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn utf8(&self, index: Utf8ConstantIndex) -> Option<&str> {
        match self.get(index.0)? {
            Constant::Utf8(string) => Some(string),
            _ => None,
        }
    }

    pub fn class(&self, index: ConstantIndex) -> Option<BinaryName> {
        match self.get(index)? {
            Constant::Class(name) => BinaryName::from_string(self.utf8(*name)?.to_owned()).ok(),
            _ => None,
        }
    }

    /// Contents of a `String` constant
    pub fn string(&self, index: ConstantIndex) -> Option<&str> {
        match self.get(index)? {
            Constant::String(utf8) => self.utf8(*utf8),
            _ => None,
        }
    }

    pub fn field_ref(&self, index: ConstantIndex) -> Option<FieldRef> {
        match self.get(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Some(FieldRef {
                    class: self.class(class.0)?,
                    name,
                    descriptor: FieldType::parse(descriptor).ok()?,
                })
            }
            _ => None,
        }
    }

    pub fn method_ref(&self, index: ConstantIndex) -> Option<MethodRef> {
        match self.get(index)? {
            Constant::MethodRef {
                class,
                name_and_type,
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Some(MethodRef {
                    class: self.class(class.0)?,
                    name,
                    descriptor: MethodDescriptor::parse(descriptor).ok()?,
                })
            }
            _ => None,
        }
    }

    fn name_and_type(&self, index: NameAndTypeConstantIndex) -> Option<(UnqualifiedName, &str)> {
        match self.get(index.0)? {
            Constant::NameAndType { name, descriptor } => {
                let name = UnqualifiedName::from_string(self.utf8(*name)?.to_owned()).ok()?;
                Some((name, self.utf8(*descriptor)?))
            }
            _ => None,
        }
    }
}

/// Oldest and newest class file versions accepted
const MIN_MAJOR_VERSION: u16 = 45;
const MAX_MAJOR_VERSION: u16 = 52;

/// Read a class file
///
/// Only the features [`crate::jvm::ClassAssembler`] produces are accepted, with one exception:
/// unknown attributes on methods, on `Code`, and on the class are skipped.
pub fn read_class(bytes: &[u8]) -> Result<ParsedClass, Error> {
    let mut reader = bytes;
    let reader = &mut reader;

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(truncated)?;
    if magic != ClassFile::MAGIC {
        return Err(format_error(format!("bad magic {:02x?}", magic)));
    }

    let minor_version = reader.read_u16::<BigEndian>().map_err(truncated)?;
    let major_version = reader.read_u16::<BigEndian>().map_err(truncated)?;
    if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major_version) {
        return Err(format_error(format!(
            "unsupported class file version {}.{}",
            major_version, minor_version
        )));
    }
    let version = Version {
        minor_version,
        major_version,
    };

    let constants = read_constants(reader)?;

    let access_flags = reader.read_u16::<BigEndian>().map_err(truncated)?;
    let access_flags = ClassAccessFlags::from_bits(access_flags)
        .ok_or_else(|| format_error(format!("bad class access flags {:#06x}", access_flags)))?;

    let this_class = read_index(reader)?;
    let this_class = constants
        .class(this_class)
        .ok_or_else(|| format_error(format!("bad this class index {}", this_class.0)))?;
    let super_class = match reader.read_u16::<BigEndian>().map_err(truncated)? {
        0 if this_class == BinaryName::OBJECT => None,
        idx => Some(
            constants
                .class(ConstantIndex(idx))
                .ok_or_else(|| format_error(format!("bad super class index {}", idx)))?,
        ),
    };

    let interfaces_count = reader.read_u16::<BigEndian>().map_err(truncated)?;
    if interfaces_count != 0 {
        return Err(format_error(String::from("interfaces are not supported")));
    }
    let fields_count = reader.read_u16::<BigEndian>().map_err(truncated)?;
    if fields_count != 0 {
        return Err(format_error(String::from("fields are not supported")));
    }

    let methods_count = reader.read_u16::<BigEndian>().map_err(truncated)?;
    let mut methods = Vec::with_capacity(methods_count as usize);
    for _ in 0..methods_count {
        methods.push(read_method(reader, &constants)?);
    }

    skip_attributes(reader, &constants)?;
    if !reader.is_empty() {
        return Err(format_error(format!(
            "{} trailing bytes after the class",
            reader.len()
        )));
    }

    Ok(ParsedClass {
        version,
        constants,
        access_flags,
        this_class,
        super_class,
        methods,
    })
}

fn read_constants(reader: &mut &[u8]) -> Result<ParsedConstants, Error> {
    let count = reader.read_u16::<BigEndian>().map_err(truncated)?;
    if count == 0 {
        return Err(format_error(String::from("constant pool count is 0")));
    }

    let mut constants = Vec::with_capacity(count as usize - 1);
    for offset in 1..count {
        let tag = reader.read_u8().map_err(truncated)?;
        let constant = match tag {
            Constant::UTF8_TAG => {
                let length = reader.read_u16::<BigEndian>().map_err(truncated)?;
                let bytes = take(reader, length as usize)?;
                let string = decode_modified_utf8(bytes)
                    .map_err(|msg| format_error(format!("constant #{}: {}", offset, msg)))?;
                Constant::Utf8(string)
            }
            Constant::CLASS_TAG => Constant::Class(Utf8ConstantIndex(read_index(reader)?)),
            Constant::STRING_TAG => Constant::String(Utf8ConstantIndex(read_index(reader)?)),
            Constant::FIELD_REF_TAG => Constant::FieldRef {
                class: ClassConstantIndex(read_index(reader)?),
                name_and_type: NameAndTypeConstantIndex(read_index(reader)?),
            },
            Constant::METHOD_REF_TAG => Constant::MethodRef {
                class: ClassConstantIndex(read_index(reader)?),
                name_and_type: NameAndTypeConstantIndex(read_index(reader)?),
            },
            Constant::NAME_AND_TYPE_TAG => Constant::NameAndType {
                name: Utf8ConstantIndex(read_index(reader)?),
                descriptor: Utf8ConstantIndex(read_index(reader)?),
            },
            other => {
                return Err(format_error(format!(
                    "unsupported constant tag {} at #{}",
                    other, offset
                )))
            }
        };
        constants.push(constant);
    }

    // Every index inside the pool must point back into the pool
    let constants = ParsedConstants(constants);
    for (offset, constant) in constants.0.iter().enumerate() {
        let well_formed = match constant {
            Constant::Utf8(_) => true,
            Constant::Class(name) | Constant::String(name) => constants.utf8(*name).is_some(),
            Constant::NameAndType { name, descriptor } => {
                constants.utf8(*name).is_some() && constants.utf8(*descriptor).is_some()
            }
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
            } => {
                matches!(constants.get(class.0), Some(Constant::Class(_)))
                    && matches!(
                        constants.get(name_and_type.0),
                        Some(Constant::NameAndType { .. })
                    )
            }
        };
        if !well_formed {
            return Err(format_error(format!(
                "constant #{} refers to a missing or mismatched constant",
                offset + 1
            )));
        }
    }
    Ok(constants)
}

fn read_method(reader: &mut &[u8], constants: &ParsedConstants) -> Result<ParsedMethod, Error> {
    let access_flags = reader.read_u16::<BigEndian>().map_err(truncated)?;
    let access_flags = MethodAccessFlags::from_bits(access_flags)
        .ok_or_else(|| format_error(format!("bad method access flags {:#06x}", access_flags)))?;

    let name_index = Utf8ConstantIndex(read_index(reader)?);
    let name = constants
        .utf8(name_index)
        .and_then(|name| UnqualifiedName::from_string(name.to_owned()).ok())
        .ok_or_else(|| format_error(format!("bad method name index {}", (name_index.0).0)))?;

    let descriptor_index = Utf8ConstantIndex(read_index(reader)?);
    let descriptor = constants
        .utf8(descriptor_index)
        .and_then(|descriptor| MethodDescriptor::parse(descriptor).ok())
        .ok_or_else(|| {
            format_error(format!(
                "bad descriptor index {} for method {}",
                (descriptor_index.0).0,
                name
            ))
        })?;
    let has_this = !access_flags.contains(MethodAccessFlags::STATIC);
    if descriptor.parameter_length(has_this) > MethodDescriptor::MAX_PARAMETER_LENGTH {
        return Err(format_error(format!(
            "method {}{} takes more than {} parameter slots",
            name,
            descriptor.render(),
            MethodDescriptor::MAX_PARAMETER_LENGTH
        )));
    }

    let mut code = None;
    let attributes_count = reader.read_u16::<BigEndian>().map_err(truncated)?;
    for _ in 0..attributes_count {
        let (attribute_name, mut info) = read_attribute(reader, constants)?;
        if attribute_name != "Code" {
            continue;
        }
        if code.is_some() {
            return Err(format_error(format!("method {} has two Code attributes", name)));
        }
        let info = &mut info;
        let parsed = read_code(info, constants)?;
        if !info.is_empty() {
            return Err(format_error(format!(
                "Code attribute of {} has trailing bytes",
                name
            )));
        }
        code = Some(parsed);
    }

    Ok(ParsedMethod {
        access_flags,
        name,
        descriptor,
        code,
    })
}

fn read_code(reader: &mut &[u8], constants: &ParsedConstants) -> Result<Code, Error> {
    let max_stack = reader.read_u16::<BigEndian>().map_err(truncated)?;
    let max_locals = reader.read_u16::<BigEndian>().map_err(truncated)?;
    let code_length = reader.read_u32::<BigEndian>().map_err(truncated)? as usize;
    if code_length == 0 || code_length > u16::MAX as usize {
        return Err(format_error(format!("bad code length {}", code_length)));
    }
    let code_array = take(reader, code_length)?.to_vec();

    let exception_table_length = reader.read_u16::<BigEndian>().map_err(truncated)?;
    if exception_table_length != 0 {
        return Err(format_error(String::from(
            "exception tables are not supported",
        )));
    }
    skip_attributes(reader, constants)?;

    Ok(Code {
        max_stack,
        max_locals,
        code_array: BytecodeArray(code_array),
    })
}

/// Read an attribute, returning its name and its contents
fn read_attribute<'a>(
    reader: &mut &'a [u8],
    constants: &ParsedConstants,
) -> Result<(String, &'a [u8]), Error> {
    let name_index = Utf8ConstantIndex(read_index(reader)?);
    let name = constants
        .utf8(name_index)
        .ok_or_else(|| format_error(format!("bad attribute name index {}", (name_index.0).0)))?
        .to_owned();
    let length = reader.read_u32::<BigEndian>().map_err(truncated)? as usize;
    Ok((name, take(reader, length)?))
}

fn skip_attributes(reader: &mut &[u8], constants: &ParsedConstants) -> Result<(), Error> {
    let count = reader.read_u16::<BigEndian>().map_err(truncated)?;
    for _ in 0..count {
        read_attribute(reader, constants)?;
    }
    Ok(())
}

fn read_index(reader: &mut &[u8]) -> Result<ConstantIndex, Error> {
    reader
        .read_u16::<BigEndian>()
        .map(ConstantIndex)
        .map_err(truncated)
}

fn take<'a>(reader: &mut &'a [u8], length: usize) -> Result<&'a [u8], Error> {
    if reader.len() < length {
        return Err(truncated(std::io::ErrorKind::UnexpectedEof.into()));
    }
    let (taken, rest) = reader.split_at(length);
    *reader = rest;
    Ok(taken)
}

fn truncated(_: std::io::Error) -> Error {
    format_error(String::from("truncated class file"))
}

fn format_error(msg: String) -> Error {
    Error::ClassFormat(msg)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hello::{HelloStyle, DEFAULT_CLASS_NAME, DEFAULT_MESSAGE};

    fn hello_bytes() -> Vec<u8> {
        HelloStyle::Ops
            .assemble(DEFAULT_CLASS_NAME, DEFAULT_MESSAGE)
            .unwrap()
    }

    fn format_message(result: Result<ParsedClass, Error>) -> String {
        match result {
            Err(Error::ClassFormat(msg)) => msg,
            other => panic!("expected a class format error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn reads_assembled_class() {
        let class = read_class(&hello_bytes()).unwrap();
        assert_eq!(class.this_class.as_str(), "Example");
        assert_eq!(class.super_class, Some(BinaryName::OBJECT));
        assert_eq!(class.access_flags, ClassAccessFlags::PUBLIC);
        assert_eq!(class.version, Version::default());

        let signatures: Vec<String> = class
            .methods
            .iter()
            .map(|method| format!("{}{}", method.name, method.descriptor.render()))
            .collect();
        assert_eq!(signatures, vec!["<init>()V", "main([Ljava/lang/String;)V"]);

        let main = &class.methods[1];
        assert!(main.access_flags.contains(MethodAccessFlags::STATIC));
        let code = main.code.as_ref().unwrap();
        assert_eq!((code.max_stack, code.max_locals), (2, 1));
        assert_eq!(code.code_array.0.len(), 9);
    }

    #[test]
    fn constants_keep_their_indices() {
        let class = read_class(&hello_bytes()).unwrap();
        assert_eq!(class.constants.utf8(Utf8ConstantIndex(ConstantIndex(1))), Some("Example"));
        assert_eq!(
            class.constants.class(ConstantIndex(4)),
            Some(BinaryName::OBJECT)
        );
        assert_eq!(class.constants.string(ConstantIndex(17)), Some("Hello world!"));
        assert!(class.constants.string(ConstantIndex(16)).is_none());
        assert!(class.constants.get(ConstantIndex(0)).is_none());

        let println = class.constants.method_ref(ConstantIndex(23)).unwrap();
        assert_eq!(println.to_string(), "java/io/PrintStream.println(Ljava/lang/String;)V");
        let out = class.constants.field_ref(ConstantIndex(15)).unwrap();
        assert_eq!(out.descriptor, FieldType::print_stream());
    }

    #[test]
    fn bad_magic() {
        let mut bytes = hello_bytes();
        bytes[0] = 0xCB;
        assert!(format_message(read_class(&bytes)).contains("magic"));
    }

    #[test]
    fn unsupported_version() {
        let mut bytes = hello_bytes();
        bytes[7] = 61;
        assert!(format_message(read_class(&bytes)).contains("version"));
    }

    #[test]
    fn truncated_class() {
        let bytes = hello_bytes();
        for length in [0, 3, 9, 40, bytes.len() - 1] {
            assert_eq!(
                format_message(read_class(&bytes[..length])),
                "truncated class file",
                "length {}",
                length
            );
        }
    }

    #[test]
    fn trailing_bytes() {
        let mut bytes = hello_bytes();
        bytes.push(0);
        assert!(format_message(read_class(&bytes)).contains("trailing"));
    }

    #[test]
    fn unknown_constant_tag() {
        let mut bytes = hello_bytes();
        // First constant tag sits right after magic, version, and count
        assert_eq!(bytes[10], Constant::UTF8_TAG);
        bytes[10] = 3;
        assert!(format_message(read_class(&bytes)).contains("tag 3"));
    }

    #[test]
    fn dangling_constant_reference() {
        let mut bytes = hello_bytes();
        // #1 is `Utf8 "Example"` (3 + 7 bytes), so #2 `Class` starts at offset 20
        assert_eq!(bytes[20], Constant::CLASS_TAG);
        bytes[21..23].copy_from_slice(&[0x01, 0x00]);
        assert!(format_message(read_class(&bytes)).contains("#2"));
    }
}
