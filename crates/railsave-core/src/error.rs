//! Error types shared by every stage of saving and loading.
//!
//! Every fatal load condition is a [`SaveLoadError`]. Conditions raised while
//! a chunk is being processed are wrapped in [`SaveLoadError::InChunk`] so the
//! caller learns which chunk tag and element index was at fault.

use crate::chunk::ChunkTag;
use crate::loader::LoadPhase;
use crate::reference::RefKind;
use crate::version::SAVEGAME_VERSION;

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, SaveLoadError>;

/// Errors that can occur while saving or loading a game.
#[derive(Debug, thiserror::Error)]
pub enum SaveLoadError {
    #[error("unrecognized savegame format (magic {0:02X?})")]
    FormatUnrecognized([u8; 4]),

    #[error("savegame version {0} is newer than supported version {max}", max = SAVEGAME_VERSION)]
    FutureVersion(u16),

    #[error("unexpected end of data: needed {needed} bytes, {remaining} left")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// The element header and the schema disagree about the element's size.
    #[error("element length mismatch: header declares {expected} bytes, schema consumed {consumed}")]
    SchemaVersionGap { expected: usize, consumed: usize },

    #[error("{kind:?} reference {id} does not name a live object")]
    ReferenceOutOfRange { kind: RefKind, id: u32 },

    #[error("{pool} pool exhausted: index {index} exceeds capacity {capacity}")]
    AllocationExhausted {
        pool: &'static str,
        index: u32,
        capacity: usize,
    },

    #[error("{pool} index {index} allocated twice")]
    DuplicateIndex { pool: &'static str, index: u32 },

    #[error("unknown chunk {0}")]
    UnknownChunk(ChunkTag),

    #[error("chunk {0} appears more than once")]
    DuplicateChunk(ChunkTag),

    #[error("corrupt savegame: {0}")]
    Corrupt(String),

    #[error("migration '{name}' failed: {reason}")]
    Migration { name: &'static str, reason: String },

    #[error("loader is in phase {actual:?}, expected {expected:?}")]
    OutOfOrder {
        expected: LoadPhase,
        actual: LoadPhase,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("chunk {tag}, element {index:?}: {source}")]
    InChunk {
        tag: ChunkTag,
        index: Option<u32>,
        #[source]
        source: Box<SaveLoadError>,
    },
}

impl SaveLoadError {
    /// Build a [`SaveLoadError::Corrupt`] from anything printable.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt(reason.into())
    }

    /// Attach chunk context. An error that already carries context keeps it,
    /// except that a missing element index is filled in.
    pub fn in_chunk(self, tag: ChunkTag, index: Option<u32>) -> Self {
        match self {
            Self::InChunk {
                tag: inner_tag,
                index: inner_index,
                source,
            } => Self::InChunk {
                tag: inner_tag,
                index: inner_index.or(index),
                source,
            },
            other => Self::InChunk {
                tag,
                index,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with chunk context stripped.
    pub fn root(&self) -> &SaveLoadError {
        match self {
            Self::InChunk { source, .. } => source.root(),
            other => other,
        }
    }

    /// Chunk tag and element index of the offending element, if known.
    pub fn location(&self) -> Option<(ChunkTag, Option<u32>)> {
        match self {
            Self::InChunk { tag, index, .. } => Some((*tag, *index)),
            _ => None,
        }
    }

    /// Whether this error means the file itself is damaged, as opposed to
    /// being an unsupported format, an I/O failure or a caller mistake.
    pub fn is_corrupt(&self) -> bool {
        !matches!(
            self.root(),
            Self::FormatUnrecognized(_)
                | Self::FutureVersion(_)
                | Self::Io(_)
                | Self::OutOfOrder { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_chunk_does_not_double_wrap() {
        let tag = ChunkTag::new(b"STNN");
        let err = SaveLoadError::UnexpectedEof {
            needed: 4,
            remaining: 1,
        }
        .in_chunk(tag, Some(3))
        .in_chunk(ChunkTag::new(b"ROAD"), None);

        assert_eq!(err.location(), Some((tag, Some(3))));
        assert!(matches!(err.root(), SaveLoadError::UnexpectedEof { .. }));
    }

    #[test]
    fn in_chunk_fills_missing_index() {
        let tag = ChunkTag::new(b"DOCK");
        let err = SaveLoadError::corrupt("bad")
            .in_chunk(tag, None)
            .in_chunk(tag, Some(7));
        assert_eq!(err.location(), Some((tag, Some(7))));
    }

    #[test]
    fn corrupt_classification() {
        assert!(SaveLoadError::corrupt("x").is_corrupt());
        assert!(
            SaveLoadError::SchemaVersionGap {
                expected: 8,
                consumed: 6
            }
            .is_corrupt()
        );
        assert!(!SaveLoadError::FormatUnrecognized(*b"ABCD").is_corrupt());
        assert!(!SaveLoadError::FutureVersion(900).is_corrupt());
    }

    #[test]
    fn display_mentions_chunk_and_index() {
        let err = SaveLoadError::ReferenceOutOfRange {
            kind: RefKind::Vehicle,
            id: 12,
        }
        .in_chunk(ChunkTag::new(b"STNN"), Some(2));
        let text = err.to_string();
        assert!(text.contains("STNN"), "{text}");
        assert!(text.contains("Some(2)"), "{text}");
    }
}
