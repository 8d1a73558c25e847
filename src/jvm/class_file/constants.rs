use crate::jvm::class_file::{Attribute, AttributeLike, Serialize};
use crate::jvm::{
    BinaryName, Error, FieldType, MethodDescriptor, Name, RenderDescriptor, UnqualifiedName,
};
use byteorder::WriteBytesExt;
use std::collections::HashMap;

/// Class file constants pool builder
///
/// The pool is append only: indices start at 1 and, once handed out, an index always refers to
/// the same constant. Interning a constant which is already in the pool returns the existing
/// index, so the serialized pool never contains duplicates.
#[derive(Default, Debug, Clone)]
pub struct ConstantPool {
    /// Entries, in insertion order (entry `i` is at index `i + 1`)
    constants: Vec<Constant>,

    /// Reverse lookup from constant to index
    indices: HashMap<Constant, ConstantIndex>,
}

impl ConstantPool {
    /// Largest usable index: the pool count is serialized as a `u16` equal to the number of
    /// entries plus one
    pub const MAX_INDEX: usize = u16::MAX as usize - 1;

    /// Make a fresh empty constants pool
    pub fn new() -> ConstantPool {
        ConstantPool::default()
    }

    /// Number of entries in the pool
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Look up the constant at an index
    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        let offset = (index.0 as usize).checked_sub(1)?;
        self.constants.get(offset)
    }

    /// Iterate over constants and their indices, in index order
    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> {
        self.constants
            .iter()
            .enumerate()
            .map(|(i, constant)| (ConstantIndex(i as u16 + 1), constant))
    }

    /// Get the index of a constant, inserting it if it is not already in the pool
    pub fn intern(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        if let Some(idx) = self.indices.get(&constant) {
            return Ok(*idx);
        }

        if let Constant::Utf8(string) = &constant {
            let encoded_len = encode_modified_utf8(string).len();
            if encoded_len > u16::MAX as usize {
                return Err(Error::Utf8ConstantTooLong(encoded_len));
            }
        }

        // Detect if the next constant would overflow the pool
        let offset = self.constants.len() + 1;
        if offset > ConstantPool::MAX_INDEX {
            return Err(Error::ConstantPoolOverflow { constant, offset });
        }

        let idx = ConstantIndex(offset as u16);
        self.indices.insert(constant.clone(), idx);
        self.constants.push(constant);
        Ok(idx)
    }

    /// Drop every constant added after the pool had `len` entries
    ///
    /// This is used to roll back the constants added while assembling a method that ended up
    /// failing.
    pub fn truncate(&mut self, len: usize) {
        for constant in self.constants.drain(len.min(self.constants.len())..) {
            self.indices.remove(&constant);
        }
    }

    /// Get or insert a utf8 constant
    pub fn get_utf8(&mut self, utf8: impl Into<String>) -> Result<Utf8ConstantIndex, Error> {
        self.intern(Constant::Utf8(utf8.into()))
            .map(Utf8ConstantIndex)
    }

    /// Get or insert a class constant (and the utf8 constant for its name)
    pub fn get_class(&mut self, class: &BinaryName) -> Result<ClassConstantIndex, Error> {
        let name = self.get_utf8(class.as_str())?;
        self.intern(Constant::Class(name)).map(ClassConstantIndex)
    }

    /// Get or insert a string constant (and the utf8 constant for its contents)
    pub fn get_string(&mut self, string: &str) -> Result<StringConstantIndex, Error> {
        let utf8 = self.get_utf8(string)?;
        self.intern(Constant::String(utf8)).map(StringConstantIndex)
    }

    /// Get or insert a name & type constant
    pub fn get_name_and_type(
        &mut self,
        name: &UnqualifiedName,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        let name = self.get_utf8(name.as_str())?;
        let descriptor = self.get_utf8(descriptor)?;
        self.intern(Constant::NameAndType { name, descriptor })
            .map(NameAndTypeConstantIndex)
    }

    /// Get or insert a field reference constant (and everything it refers to)
    pub fn get_field_ref(
        &mut self,
        class: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &FieldType,
    ) -> Result<FieldRefConstantIndex, Error> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, &descriptor.render())?;
        self.intern(Constant::FieldRef {
            class,
            name_and_type,
        })
        .map(FieldRefConstantIndex)
    }

    /// Get or insert a method reference constant (and everything it refers to)
    pub fn get_method_ref(
        &mut self,
        class: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Result<MethodRefConstantIndex, Error> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, &descriptor.render())?;
        self.intern(Constant::MethodRef {
            class,
            name_and_type,
        })
        .map(MethodRefConstantIndex)
    }

    /// Add an attribute, interning its name
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info).map_err(Error::IoError)?;
        Ok(Attribute { name_index, info })
    }
}

/// The count is one more than the number of entries (index 0 is never used)
impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.constants.len() as u16 + 1).serialize(writer)?;
        for constant in &self.constants {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

/// Constants as in the constant pool
///
/// Only the constants needed for classes with static methods that call out to existing code are
/// included.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (see [`encode_modified_utf8`]).
    Utf8(String),

    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Field
    FieldRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Method on a class (not an interface)
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    },
}

impl Constant {
    pub const UTF8_TAG: u8 = 1;
    pub const CLASS_TAG: u8 = 7;
    pub const STRING_TAG: u8 = 8;
    pub const FIELD_REF_TAG: u8 = 9;
    pub const METHOD_REF_TAG: u8 = 10;
    pub const NAME_AND_TYPE_TAG: u8 = 12;
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                Constant::UTF8_TAG.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Class(name) => {
                Constant::CLASS_TAG.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(utf8) => {
                Constant::STRING_TAG.serialize(writer)?;
                utf8.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                Constant::NAME_AND_TYPE_TAG.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::FieldRef {
                class,
                name_and_type,
            } => {
                Constant::FIELD_REF_TAG.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
            } => {
                Constant::METHOD_REF_TAG.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. The differences from standard UTF-8 are:
///
///  * the null character `\u0000` is encoded in 2-byte format, so encoded strings never contain
///    a zero byte
///  * only the 1-byte, 2-byte, and 3-byte formats are used
///  * supplementary characters are represented as surrogate pairs, each encoded on its own
///
/// Working on UTF-16 code units handles the last two points for free.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = Vec::with_capacity(string.len());
    for unit in string.encode_utf16() {
        match unit {
            0x0001..=0x007F => buffer.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                buffer.push(0b1100_0000 | (unit >> 6) as u8);
                buffer.push(0b1000_0000 | (unit & 0x3F) as u8);
            }
            _ => {
                buffer.push(0b1110_0000 | (unit >> 12) as u8);
                buffer.push(0b1000_0000 | (unit >> 6 & 0x3F) as u8);
                buffer.push(0b1000_0000 | (unit & 0x3F) as u8);
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Fails on truncated sequences, on byte patterns that modified UTF-8 never produces, and on
/// unpaired surrogates.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    let continuation = |byte: Option<u8>| -> Result<u16, String> {
        match byte {
            Some(b) if b & 0b1100_0000 == 0b1000_0000 => Ok((b & 0x3F) as u16),
            Some(b) => Err(format!("Invalid continuation byte {:#04x}", b)),
            None => Err(String::from("Truncated modified UTF-8 sequence")),
        }
    };

    while let Some(lead) = iter.next() {
        let unit = match lead {
            0x01..=0x7F => lead as u16,
            0xC0..=0xDF => ((lead & 0x1F) as u16) << 6 | continuation(iter.next())?,
            0xE0..=0xEF => {
                let high = continuation(iter.next())?;
                let low = continuation(iter.next())?;
                ((lead & 0x0F) as u16) << 12 | high << 6 | low
            }
            _ => return Err(format!("Invalid modified UTF-8 byte {:#04x}", lead)),
        };
        units.push(unit);
    }

    String::from_utf16(&units).map_err(|err| err.to_string())
}

/// Index of any constant in the pool
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug, PartialOrd, Ord)]
pub struct ConstantIndex(pub u16);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// Declare indices that are known to point to a specific kind of constant
macro_rules! typed_constant_indices {
    ($($(#[$meta:meta])* $name:ident,)*) => {
        $(
            $(#[$meta])*
            #[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
            pub struct $name(pub ConstantIndex);

            impl From<$name> for ConstantIndex {
                fn from(index: $name) -> ConstantIndex {
                    index.0
                }
            }

            impl Serialize for $name {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }
        )*
    };
}

typed_constant_indices! {
    /// Index of a [`Constant::Utf8`]
    Utf8ConstantIndex,
    /// Index of a [`Constant::Class`]
    ClassConstantIndex,
    /// Index of a [`Constant::String`]
    StringConstantIndex,
    /// Index of a [`Constant::NameAndType`]
    NameAndTypeConstantIndex,
    /// Index of a [`Constant::FieldRef`]
    FieldRefConstantIndex,
    /// Index of a [`Constant::MethodRef`]
    MethodRefConstantIndex,
}

#[cfg(test)]
mod encode_modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("Hello world!"), b"Hello world!".to_vec());
    }

    #[test]
    fn two_and_three_byte_encodings() {
        assert_eq!(encode_modified_utf8("Ąé"), vec![196, 132, 195, 169]);
        assert_eq!(encode_modified_utf8("अ"), vec![224, 164, 133]);
    }

    #[test]
    fn supplementary_characters() {
        assert_eq!(
            encode_modified_utf8("\u{10000}\u{10FFFF}"),
            vec![237, 160, 128, 237, 176, 128, 237, 175, 191, 237, 191, 191]
        );
    }

    #[test]
    fn decoding_inverts_encoding() {
        for text in ["", "Hello world!", "a\x00a", "Ąé अ", "\u{1F600} smile"] {
            assert_eq!(decode_modified_utf8(&encode_modified_utf8(text)).unwrap(), text);
        }
    }

    #[test]
    fn decoding_rejects_malformed_input() {
        assert!(decode_modified_utf8(&[0x00]).is_err());
        assert!(decode_modified_utf8(&[0xC4]).is_err());
        assert!(decode_modified_utf8(&[0xE0, 0xA4, 0x41]).is_err());
        assert!(decode_modified_utf8(&[0xED, 0xA0, 0x80]).is_err()); // lone high surrogate
    }
}
