use byteorder::{BigEndian, WriteBytesExt};
use std::io::Result;

/// Utility trait for serializing data inside class files
///
/// Class files have a couple of peculiarities that make a dedicated trait more convenient than a
/// general serialization framework:
///
///   - every multi-byte quantity is big-endian
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually a `u16` prefix
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Serialize for u16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(*self)
    }
}

impl Serialize for u32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(*self)
    }
}

/// Size in `u16` is the first thing serialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.len() as u16).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn big_endian_integers() {
        let mut buffer = vec![];
        0xCAu8.serialize(&mut buffer).unwrap();
        0xFEBAu16.serialize(&mut buffer).unwrap();
        0x0000_0102u32.serialize(&mut buffer).unwrap();
        assert_eq!(buffer, vec![0xCA, 0xFE, 0xBA, 0x00, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn sequences_are_length_prefixed() {
        let mut buffer = vec![];
        vec![7u16, 9u16].serialize(&mut buffer).unwrap();
        assert_eq!(buffer, vec![0, 2, 0, 7, 0, 9]);
    }
}
