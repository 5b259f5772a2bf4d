//! Helper for describing the fixed-offset fields of on-disk records.

use byteorder::{ByteOrder, LittleEndian};

/// Little-endian decoders used by the generated accessors.
pub(crate) fn read_u32(data: &[u8]) -> u32 {
    LittleEndian::read_u32(data)
}

pub(crate) fn read_i32(data: &[u8]) -> i32 {
    LittleEndian::read_i32(data)
}

/// Given a name, a type and a byte offset, generates an accessor which
/// extracts that little-endian field from the record's `data` bytes.
macro_rules! define_field {
    ($name:ident, u32, $offset:expr) => {
        pub fn $name(&self) -> u32 {
            $crate::structure::read_u32(&self.data[$offset..$offset + 4])
        }
    };
    ($name:ident, i32, $offset:expr) => {
        pub fn $name(&self) -> i32 {
            $crate::structure::read_i32(&self.data[$offset..$offset + 4])
        }
    };
}

pub(crate) use define_field;
