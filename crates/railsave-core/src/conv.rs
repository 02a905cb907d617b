//! Scalar conversion between on-disk and in-memory representations.
//!
//! A [`Conversion`] pairs a [`FileType`] (width and signedness on disk) with
//! a [`MemType`] (width and signedness in memory). Reading extends the disk
//! value by the disk type's signedness and then narrows it into the memory
//! type; writing narrows the memory value into the disk type. The memory half
//! is never written by hand: it comes from the [`MemScalar`] implementation
//! of the field's Rust type, so a width mismatch fails to compile.

use crate::error::{Result, SaveLoadError};

// ---------------------------------------------------------------------------
// File and memory types
// ---------------------------------------------------------------------------

/// Representation of a scalar on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    /// A string table index. Stored like `U16`.
    StringId,
}

impl FileType {
    /// Width on disk, in bytes.
    pub const fn size(self) -> usize {
        match self {
            FileType::I8 | FileType::U8 => 1,
            FileType::I16 | FileType::U16 | FileType::StringId => 2,
            FileType::I32 | FileType::U32 => 4,
            FileType::I64 | FileType::U64 => 8,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            FileType::I8 | FileType::I16 | FileType::I32 | FileType::I64
        )
    }
}

/// Representation of a scalar in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    /// Obsolete town-name identifier, a 16-bit unsigned value.
    Name,
}

impl MemType {
    /// Storage size in memory, in bytes.
    pub const fn size(self) -> usize {
        match self {
            MemType::Bool | MemType::I8 | MemType::U8 => 1,
            MemType::I16 | MemType::U16 | MemType::Name => 2,
            MemType::I32 | MemType::U32 => 4,
            MemType::I64 | MemType::U64 => 8,
        }
    }

    /// Truncate a wide value into this memory type and re-extend it by the
    /// memory type's own signedness.
    pub fn narrow(self, value: i64) -> i64 {
        match self {
            MemType::Bool => i64::from(value != 0),
            MemType::I8 => i64::from(value as i8),
            MemType::U8 => i64::from(value as u8),
            MemType::I16 => i64::from(value as i16),
            MemType::U16 | MemType::Name => i64::from(value as u16),
            MemType::I32 => i64::from(value as i32),
            MemType::U32 => i64::from(value as u32),
            MemType::I64 | MemType::U64 => value,
        }
    }
}

/// A disk/memory type pair for one scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conversion {
    pub file: FileType,
    pub mem: MemType,
}

impl Conversion {
    pub const fn new(file: FileType, mem: MemType) -> Self {
        Self { file, mem }
    }
}

// ---------------------------------------------------------------------------
// Scalar encode/decode
// ---------------------------------------------------------------------------

/// Decode `raw` (big-endian, exactly `conv.file.size()` bytes) into the
/// memory representation, returned widened to `i64`.
pub fn read_scalar(raw: &[u8], conv: Conversion) -> Result<i64> {
    let width = conv.file.size();
    if raw.len() < width {
        return Err(SaveLoadError::UnexpectedEof {
            needed: width,
            remaining: raw.len(),
        });
    }
    let mut bits: u64 = 0;
    for &b in &raw[..width] {
        bits = (bits << 8) | u64::from(b);
    }
    let wide = match conv.file {
        FileType::I8 => i64::from(bits as u8 as i8),
        FileType::I16 => i64::from(bits as u16 as i16),
        FileType::I32 => i64::from(bits as u32 as i32),
        FileType::I64 | FileType::U64 => bits as i64,
        FileType::U8 | FileType::U16 | FileType::StringId | FileType::U32 => bits as i64,
    };
    Ok(conv.mem.narrow(wide))
}

/// Encode a memory value into its on-disk bytes.
pub fn write_scalar(value: i64, conv: Conversion) -> Vec<u8> {
    let mut out = Vec::with_capacity(conv.file.size());
    put_scalar(&mut out, value, conv.file);
    out
}

/// Append the big-endian encoding of `value`, truncated to `file`'s width.
pub fn put_scalar(out: &mut Vec<u8>, value: i64, file: FileType) {
    let bytes = (value as u64).to_be_bytes();
    out.extend_from_slice(&bytes[8 - file.size()..]);
}

// ---------------------------------------------------------------------------
// Memory-side types
// ---------------------------------------------------------------------------

/// A Rust type that can be the memory half of a scalar conversion.
pub trait MemScalar: Copy + Send + Sync + 'static {
    const MEM: MemType;

    fn to_i64(self) -> i64;
    fn from_i64(value: i64) -> Self;
}

/// Obsolete 16-bit town-name identifier, kept only so old towns load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LegacyNameId(pub u16);

impl MemScalar for bool {
    const MEM: MemType = MemType::Bool;

    fn to_i64(self) -> i64 {
        i64::from(self)
    }

    fn from_i64(value: i64) -> Self {
        value != 0
    }
}

impl MemScalar for LegacyNameId {
    const MEM: MemType = MemType::Name;

    fn to_i64(self) -> i64 {
        i64::from(self.0)
    }

    fn from_i64(value: i64) -> Self {
        LegacyNameId(value as u16)
    }
}

macro_rules! impl_mem_scalar {
    ($($ty:ty => $mem:ident),* $(,)?) => {
        $(
            impl MemScalar for $ty {
                const MEM: MemType = {
                    assert!(MemType::$mem.size() == std::mem::size_of::<$ty>());
                    MemType::$mem
                };

                fn to_i64(self) -> i64 {
                    self as i64
                }

                fn from_i64(value: i64) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_mem_scalar! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
}
