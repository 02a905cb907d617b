//! The chunk container.
//!
//! After the header a file is a sequence of chunks:
//!
//! ```text
//! chunk   := tag[4] flags[1] payload
//! flags   := kind (low nibble) | 0x80 if this is the last chunk
//! record  := gamma(len) body[len]
//! array   := element* gamma(0)
//! element := gamma(1)                  vacant index
//!          | gamma(2)                  retired index
//!          | gamma(len + 3) body[len]  live element
//! ```
//!
//! Element indices are implicit: the n-th element header describes index n.

use std::fmt;

use crate::buffer::{LoadBuffer, SaveBuffer};
use crate::error::{Result, SaveLoadError};
use crate::pool::{Pool, SlotState};
use crate::reference::FixupContext;
use crate::schema::Schema;
use crate::version::FormatVersion;

// ---------------------------------------------------------------------------
// Tags, kinds, headers
// ---------------------------------------------------------------------------

/// Four-byte chunk identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkTag(pub [u8; 4]);

impl ChunkTag {
    pub const fn new(tag: &[u8; 4]) -> Self {
        Self(*tag)
    }
}

impl fmt::Display for ChunkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ChunkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkTag({self})")
    }
}

/// Layout of a chunk's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// One object with a length prefix.
    Record = 0,
    /// Index-addressed elements.
    Array = 1,
}

/// Flag bit marking the final chunk of a file.
pub const CHUNK_LAST: u8 = 0x80;
const CHUNK_KIND_MASK: u8 = 0x0F;

const ELEMENT_END: u32 = 0;
const ELEMENT_VACANT: u32 = 1;
const ELEMENT_RETIRED: u32 = 2;
const ELEMENT_LIVE_BASE: u32 = 3;

/// Decoded chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub tag: ChunkTag,
    pub kind: ChunkKind,
    pub last: bool,
}

impl ChunkHeader {
    pub fn write(&self, out: &mut SaveBuffer) {
        out.write_bytes(&self.tag.0);
        let mut flags = self.kind as u8;
        if self.last {
            flags |= CHUNK_LAST;
        }
        out.write_u8(flags);
    }

    pub fn read(input: &mut LoadBuffer<'_>) -> Result<Self> {
        let mut tag = [0u8; 4];
        tag.copy_from_slice(input.read_bytes(4)?);
        let tag = ChunkTag(tag);
        let flags = input.read_u8()?;
        let kind = match flags & CHUNK_KIND_MASK {
            0 => ChunkKind::Record,
            1 => ChunkKind::Array,
            other => {
                return Err(
                    SaveLoadError::corrupt(format!("unknown chunk kind {other}")).in_chunk(tag, None)
                );
            }
        };
        if flags & !(CHUNK_KIND_MASK | CHUNK_LAST) != 0 {
            return Err(SaveLoadError::corrupt(format!("reserved chunk flags {flags:#04x}")).in_chunk(tag, None));
        }
        Ok(Self {
            tag,
            kind,
            last: flags & CHUNK_LAST != 0,
        })
    }
}

/// One entry of an array chunk handed to a loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Live(u32),
    Retired(u32),
}

impl Element {
    pub fn index(self) -> u32 {
        match self {
            Element::Live(i) | Element::Retired(i) => i,
        }
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Load-side view of one chunk.
pub struct ChunkReader<'a, 'b> {
    input: &'b mut LoadBuffer<'a>,
    header: ChunkHeader,
    elements: u32,
    finished: bool,
}

impl<'a, 'b> ChunkReader<'a, 'b> {
    pub fn new(input: &'b mut LoadBuffer<'a>, header: ChunkHeader) -> Self {
        Self {
            input,
            header,
            elements: 0,
            finished: false,
        }
    }

    pub fn tag(&self) -> ChunkTag {
        self.header.tag
    }

    pub fn kind(&self) -> ChunkKind {
        self.header.kind
    }

    pub fn version(&self) -> FormatVersion {
        self.input.version()
    }

    /// Number of live elements (or records) read so far.
    pub fn elements(&self) -> u32 {
        self.elements
    }

    /// Whether the payload has been consumed up to its end.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn expect_kind(&self, kind: ChunkKind) -> Result<()> {
        if self.header.kind != kind || self.finished {
            return Err(SaveLoadError::corrupt(format!(
                "chunk read as {kind:?}, header says {:?}",
                self.header.kind
            ))
            .in_chunk(self.header.tag, None));
        }
        Ok(())
    }

    /// Visit every element of an array chunk in index order. Vacant indices
    /// are skipped. Each live element gets a buffer holding exactly its
    /// bytes; the callback must consume all of them.
    pub fn for_each_element(
        &mut self,
        mut visit: impl FnMut(Element, &mut LoadBuffer<'a>) -> Result<()>,
    ) -> Result<()> {
        self.expect_kind(ChunkKind::Array)?;
        let tag = self.header.tag;
        let mut index: u32 = 0;
        loop {
            let code = self
                .input
                .read_gamma()
                .map_err(|e| e.in_chunk(tag, Some(index)))?;
            match code {
                ELEMENT_END => break,
                ELEMENT_VACANT => {}
                ELEMENT_RETIRED => {
                    let mut empty = LoadBuffer::new(&[], self.input.version());
                    visit(Element::Retired(index), &mut empty).map_err(|e| e.in_chunk(tag, Some(index)))?;
                }
                n => {
                    let len = (n - ELEMENT_LIVE_BASE) as usize;
                    let mut body = self
                        .input
                        .sub_buffer(len)
                        .map_err(|e| e.in_chunk(tag, Some(index)))?;
                    visit(Element::Live(index), &mut body)
                        .and_then(|()| check_consumed(&body, len))
                        .map_err(|e| element_error(e, len).in_chunk(tag, Some(index)))?;
                    self.elements += 1;
                }
            }
            index = index
                .checked_add(1)
                .ok_or_else(|| SaveLoadError::corrupt("element index overflow").in_chunk(tag, None))?;
        }
        self.finished = true;
        Ok(())
    }

    /// Read the single object of a record chunk.
    pub fn read_record(&mut self, read: impl FnOnce(&mut LoadBuffer<'a>) -> Result<()>) -> Result<()> {
        self.expect_kind(ChunkKind::Record)?;
        let tag = self.header.tag;
        let len = self.input.read_gamma().map_err(|e| e.in_chunk(tag, None))? as usize;
        let mut body = self.input.sub_buffer(len).map_err(|e| e.in_chunk(tag, None))?;
        read(&mut body)
            .and_then(|()| check_consumed(&body, len))
            .map_err(|e| element_error(e, len).in_chunk(tag, None))?;
        self.elements = 1;
        self.finished = true;
        Ok(())
    }
}

fn check_consumed(body: &LoadBuffer<'_>, len: usize) -> Result<()> {
    if body.is_empty() {
        Ok(())
    } else {
        Err(SaveLoadError::SchemaVersionGap {
            expected: len,
            consumed: body.position(),
        })
    }
}

/// A read past the end of an element means the schema expected more bytes
/// than the element holds.
fn element_error(err: SaveLoadError, len: usize) -> SaveLoadError {
    match err {
        SaveLoadError::UnexpectedEof { needed, remaining } => SaveLoadError::SchemaVersionGap {
            expected: len,
            consumed: len - remaining + needed,
        },
        other => other,
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// Save-side view of one chunk.
pub struct ChunkWriter<'a> {
    out: &'a mut SaveBuffer,
    header: ChunkHeader,
    next_index: u32,
    elements: u32,
}

impl<'a> ChunkWriter<'a> {
    /// Write the chunk header and start the payload.
    pub fn new(out: &'a mut SaveBuffer, header: ChunkHeader) -> Self {
        header.write(out);
        Self {
            out,
            header,
            next_index: 0,
            elements: 0,
        }
    }

    pub fn tag(&self) -> ChunkTag {
        self.header.tag
    }

    pub fn elements(&self) -> u32 {
        self.elements
    }

    /// Format the payload is laid out in.
    pub fn version(&self) -> FormatVersion {
        self.out.version()
    }

    fn skip_to(&mut self, index: u32) {
        debug_assert_eq!(self.header.kind, ChunkKind::Array);
        debug_assert!(index >= self.next_index, "elements must be written in index order");
        while self.next_index < index {
            self.out.write_gamma(ELEMENT_VACANT);
            self.next_index += 1;
        }
        self.next_index = index + 1;
    }

    /// Start live element `index` of `len` bytes and return the buffer the
    /// body goes into. Skipped indices are written as vacant.
    pub fn element(&mut self, index: u32, len: usize) -> &mut SaveBuffer {
        self.skip_to(index);
        self.out.write_gamma(len as u32 + ELEMENT_LIVE_BASE);
        self.elements += 1;
        &mut *self.out
    }

    pub fn write_element(&mut self, index: u32, body: &[u8]) {
        self.element(index, body.len()).write_bytes(body);
    }

    /// Mark `index` as allocated-then-deleted.
    pub fn write_retired(&mut self, index: u32) {
        self.skip_to(index);
        self.out.write_gamma(ELEMENT_RETIRED);
    }

    /// Start the body of a record chunk.
    pub fn record(&mut self, len: usize) -> &mut SaveBuffer {
        debug_assert_eq!(self.header.kind, ChunkKind::Record);
        self.out.write_gamma(len as u32);
        self.elements = 1;
        &mut *self.out
    }

    /// Close the chunk.
    pub fn finish(self) -> u32 {
        if self.header.kind == ChunkKind::Array {
            self.out.write_gamma(ELEMENT_END);
        }
        self.elements
    }
}

// ---------------------------------------------------------------------------
// Pool helpers
// ---------------------------------------------------------------------------

/// Write every slot of `pool` through `schema`.
pub fn save_pool<T, G>(w: &mut ChunkWriter<'_>, pool: &Pool<T>, schema: &Schema<T, G>, g: &G) {
    let fv = w.version();
    for (index, state) in pool.slot_states() {
        match state {
            SlotState::Occupied => {
                if let Some(obj) = pool.get_index(index) {
                    let len = schema.length(obj, g, &fv);
                    let out = w.element(index, len);
                    let start = out.len();
                    schema.write(obj, g, out);
                    debug_assert_eq!(out.len() - start, len);
                }
            }
            SlotState::Retired => w.write_retired(index),
            SlotState::Vacant => {}
        }
    }
}

/// Load every element of an array chunk into `pool` at its file index.
pub fn load_pool<T: Default, G>(
    r: &mut ChunkReader<'_, '_>,
    pool: &mut Pool<T>,
    schema: &Schema<T, G>,
    g: &mut G,
) -> Result<()> {
    r.for_each_element(|element, body| match element {
        Element::Live(index) => {
            pool.check_index(index)?;
            let mut obj = T::default();
            schema.read(&mut obj, g, body)?;
            pool.insert_at(index, obj).map(|_| ())
        }
        Element::Retired(index) => pool.retire_at(index),
    })
}

/// Run `schema`'s pointer pass over every live object of `pool`.
pub fn fixup_pool<T, G>(
    tag: ChunkTag,
    pool: &mut Pool<T>,
    schema: &Schema<T, G>,
    g: &mut G,
    ctx: &FixupContext<'_>,
) -> Result<()> {
    for (handle, obj) in pool.iter_mut() {
        schema
            .fixup(obj, g, ctx)
            .map_err(|e| e.in_chunk(tag, Some(handle.index())))?;
    }
    Ok(())
}
