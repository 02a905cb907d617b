//! Railsave Core -- a versioned binary save/load engine for tile-based
//! transport simulations.
//!
//! A save file is a header naming the format version followed by a sequence
//! of tagged chunks. Every persisted struct is described by a declarative
//! [`schema::Schema`]: an ordered list of field descriptors, each carrying
//! the version window in which it exists on disk. The same schema drives
//! length computation, writing, reading, and pointer fixup, so a file written
//! by an older format is read by skipping or defaulting the fields that did
//! not exist yet.
//!
//! # Load Pipeline
//!
//! [`loader::load`] runs four whole-file passes in order:
//!
//! 1. **Identify** -- Parse the magic and version ([`version::FormatVersion`]).
//! 2. **Raw load** -- Read every chunk; cross-object references stay indices.
//! 3. **Resolve** -- Turn every index into a typed [`pool::Handle`].
//! 4. **Post-load** -- Per-chunk repair hooks, then one-shot migrations.
//!
//! Because references are resolved only after every chunk has been read,
//! chunks may appear in any order and references may form cycles.
//!
//! # Key Types
//!
//! - [`pool::Pool`] -- Index-addressed object store with generational handles.
//! - [`descriptor::FieldDescriptor`] -- One persisted field and its layout.
//! - [`chunk::ChunkReader`] / [`chunk::ChunkWriter`] -- Chunk payload framing.
//! - [`loader::SaveGame`] -- Implemented by a world to expose its chunks.
//! - [`error::SaveLoadError`] -- Every failure a load can report.

pub mod buffer;
pub mod chunk;
pub mod conv;
pub mod descriptor;
pub mod error;
pub mod loader;
pub mod migration;
pub mod pool;
pub mod reference;
pub mod schema;
pub mod version;

pub use chunk::{ChunkKind, ChunkReader, ChunkTag, ChunkWriter};
pub use error::{Result, SaveLoadError};
pub use loader::{ChunkHandler, LoadPhase, Loader, SaveGame, load, load_from, save, save_to};
pub use pool::{Handle, Pool};
pub use reference::{FixupContext, Link, Pooled, RefKind, ReferenceTable};
pub use schema::Schema;
pub use version::{Availability, FormatVersion, SAVEGAME_VERSION};
