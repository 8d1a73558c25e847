use crate::jvm::class_file::Serialize;
use byteorder::WriteBytesExt;
use std::io::Result;

/// Version of the class file, which is used to verify that the JVM has the necessary features to
/// interpret the class
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Version {
    pub minor_version: u16,
    pub major_version: u16,
}

impl Version {
    /// JVM class file version corresponding to Java 1.1 (released February 1997)
    ///
    /// This is the oldest version every JVM still accepts, and it has the convenient property of
    /// not requiring a `StackMapTable` attribute.
    pub const JAVA1_1: Version = Version {
        minor_version: 3,
        major_version: 45,
    };

    /// JVM class file version corresponding to Java SE 8 (released March 2014)
    pub const JAVA8: Version = Version {
        minor_version: 0,
        major_version: 52,
    };
}

impl Default for Version {
    fn default() -> Version {
        Version::JAVA1_1
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)?;
        Ok(())
    }
}
