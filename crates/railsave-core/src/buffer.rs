//! Byte cursors used by the interpreter and the chunk container.
//!
//! Multi-byte integers are big-endian. Lengths use the "simple gamma"
//! prefix code: the number of leading one bits in the first byte says how
//! many extra bytes follow.

use crate::error::{Result, SaveLoadError};
use crate::version::FormatVersion;

/// Largest value the gamma code can carry.
pub const GAMMA_MAX: u32 = u32::MAX;

// ---------------------------------------------------------------------------
// LoadBuffer
// ---------------------------------------------------------------------------

/// Read cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct LoadBuffer<'a> {
    data: &'a [u8],
    pos: usize,
    version: FormatVersion,
}

impl<'a> LoadBuffer<'a> {
    pub fn new(data: &'a [u8], version: FormatVersion) -> Self {
        Self {
            data,
            pos: 0,
            version,
        }
    }

    /// Format of the file being read.
    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(SaveLoadError::UnexpectedEof {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_be_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_be_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_array().map(u64::from_be_bytes)
    }

    /// Decode one gamma-coded length.
    pub fn read_gamma(&mut self) -> Result<u32> {
        let lead = self.read_u8()?;
        let (extra, mut value) = match lead {
            0x00..=0x7F => (0, u32::from(lead)),
            0x80..=0xBF => (1, u32::from(lead & 0x3F)),
            0xC0..=0xDF => (2, u32::from(lead & 0x1F)),
            0xE0..=0xEF => (3, u32::from(lead & 0x0F)),
            // The low three bits carry nothing when four bytes follow.
            0xF0..=0xF7 => (4, 0),
            _ => {
                return Err(SaveLoadError::corrupt(format!(
                    "invalid gamma lead byte {lead:#04x}"
                )));
            }
        };
        for _ in 0..extra {
            value = (value << 8) | u32::from(self.read_u8()?);
        }
        Ok(value)
    }

    /// Split off the next `len` bytes as an independent cursor.
    pub fn sub_buffer(&mut self, len: usize) -> Result<LoadBuffer<'a>> {
        let data = self.read_bytes(len)?;
        Ok(LoadBuffer::new(data, self.version))
    }
}

// ---------------------------------------------------------------------------
// SaveBuffer
// ---------------------------------------------------------------------------

/// Growable output buffer. Writes the current format unless built with
/// [`SaveBuffer::with_version`].
#[derive(Debug, Clone)]
pub struct SaveBuffer {
    data: Vec<u8>,
    version: FormatVersion,
}

impl Default for SaveBuffer {
    fn default() -> Self {
        Self::with_version(FormatVersion::CURRENT)
    }
}

impl SaveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that lays fields out as a file of format `version` would.
    /// Used to build fixtures in older layouts.
    pub fn with_version(version: FormatVersion) -> Self {
        Self {
            data: Vec::new(),
            version,
        }
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub(crate) fn vec_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_gamma(&mut self, v: u32) {
        match gamma_len(v) {
            1 => self.write_u8(v as u8),
            2 => self.write_u16(0x8000 | v as u16),
            3 => {
                self.write_u8(0xC0 | (v >> 16) as u8);
                self.write_u16(v as u16);
            }
            4 => self.write_u32(0xE000_0000 | v),
            _ => {
                self.write_u8(0xF0);
                self.write_u32(v);
            }
        }
    }
}

/// Encoded size of a gamma-coded value.
pub const fn gamma_len(v: u32) -> usize {
    if v < 0x80 {
        1
    } else if v < 0x4000 {
        2
    } else if v < 0x20_0000 {
        3
    } else if v < 0x1000_0000 {
        4
    } else {
        5
    }
}
