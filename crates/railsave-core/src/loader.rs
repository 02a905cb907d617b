//! The staged loader and the save driver.
//!
//! Loading runs as a sequence of whole-file passes:
//!
//! 1. **Identify** -- parse the header into a [`FormatVersion`].
//! 2. **Raw load** -- every chunk in file order; references stay as indices.
//! 3. **Resolve** -- every handler's fixup, in handler-table order.
//! 4. **Post-load** -- repair hooks, then one-shot migrations.
//!
//! Passes never interleave. Any failure drops the partially built world and
//! leaves the loader in [`LoadPhase::Corrupt`].

use std::io::{Read, Write};

use tracing::{debug, info};

use crate::buffer::{LoadBuffer, SaveBuffer};
use crate::chunk::{ChunkHeader, ChunkKind, ChunkReader, ChunkTag, ChunkWriter};
use crate::error::{Result, SaveLoadError};
use crate::migration::MigrationRegistry;
use crate::reference::{FixupContext, ReferenceTable};
use crate::version::FormatVersion;

// ---------------------------------------------------------------------------
// Chunk handlers
// ---------------------------------------------------------------------------

pub type SaveProc<W> = fn(&W, &mut ChunkWriter<'_>);
pub type LoadProc<W> = fn(&mut W, &mut ChunkReader<'_, '_>) -> Result<()>;
pub type FixupProc<W> = fn(&mut W, &FixupContext<'_>) -> Result<()>;
pub type PostLoadProc<W> = fn(&mut W, &FormatVersion) -> Result<()>;

/// The callbacks that persist one chunk.
pub struct ChunkHandler<W> {
    pub tag: ChunkTag,
    pub kind: ChunkKind,
    /// `None` for chunks that are only read from old files.
    pub save: Option<SaveProc<W>>,
    pub load: LoadProc<W>,
    pub fixup: Option<FixupProc<W>>,
    pub post_load: Option<PostLoadProc<W>>,
}

/// A world that can be saved and loaded.
pub trait SaveGame: Sized + 'static {
    type Config;

    /// Every chunk this world knows, in save and fixup order.
    fn chunk_handlers() -> &'static [ChunkHandler<Self>];

    /// A world with empty pools, ready to be loaded into.
    fn empty(config: &Self::Config) -> Self;

    /// Occupancy snapshot of every pool references can point into.
    fn reference_table(&self) -> ReferenceTable;

    /// One-shot structural migrations run after post-load hooks.
    fn migrations() -> MigrationRegistry<Self> {
        MigrationRegistry::new()
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Progress of one load operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Unopened,
    FormatIdentified,
    ChunksRawLoaded,
    PointersResolved,
    PostLoadMigrationsApplied,
    Ready,
    Corrupt,
}

/// Drives one load through its phases.
pub struct Loader<'a, W: SaveGame> {
    data: &'a [u8],
    phase: LoadPhase,
    version: FormatVersion,
    body_start: usize,
    world: Option<W>,
}

impl<'a, W: SaveGame> Loader<'a, W> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            phase: LoadPhase::Unopened,
            version: FormatVersion::CURRENT,
            body_start: 0,
            world: None,
        }
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    /// Format of the file; meaningful once identified.
    pub fn version(&self) -> FormatVersion {
        self.version
    }

    /// The world under construction, if any.
    pub fn world(&self) -> Option<&W> {
        self.world.as_ref()
    }

    fn advance<R>(
        &mut self,
        expected: LoadPhase,
        next: LoadPhase,
        pass: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        if self.phase != expected {
            return Err(SaveLoadError::OutOfOrder {
                expected,
                actual: self.phase,
            });
        }
        match pass(self) {
            Ok(r) => {
                self.phase = next;
                Ok(r)
            }
            Err(e) => {
                self.phase = LoadPhase::Corrupt;
                self.world = None;
                Err(e)
            }
        }
    }

    fn world_mut(&mut self) -> Result<&mut W> {
        self.world
            .as_mut()
            .ok_or_else(|| SaveLoadError::corrupt("no world under construction"))
    }

    /// Parse the file header.
    pub fn identify_format(&mut self) -> Result<FormatVersion> {
        self.advance(LoadPhase::Unopened, LoadPhase::FormatIdentified, |this| {
            let (version, header_len) = FormatVersion::identify(this.data)?;
            this.version = version;
            this.body_start = header_len;
            info!(%version, bytes = this.data.len(), "savegame format identified");
            Ok(version)
        })
    }

    /// Read every chunk into a fresh world built from `config`.
    pub fn load_chunks(&mut self, config: &W::Config) -> Result<()> {
        self.advance(LoadPhase::FormatIdentified, LoadPhase::ChunksRawLoaded, |this| {
            let data = this.data;
            let mut world = W::empty(config);
            let mut input = LoadBuffer::new(&data[this.body_start..], this.version);
            let mut seen: Vec<ChunkTag> = Vec::new();
            let handlers = W::chunk_handlers();

            while !input.is_empty() {
                let header = ChunkHeader::read(&mut input)?;
                let handler = handlers
                    .iter()
                    .find(|h| h.tag == header.tag)
                    .ok_or(SaveLoadError::UnknownChunk(header.tag))?;
                if seen.contains(&header.tag) {
                    return Err(SaveLoadError::DuplicateChunk(header.tag));
                }
                seen.push(header.tag);
                if handler.kind != header.kind {
                    return Err(SaveLoadError::corrupt(format!(
                        "expected {:?} chunk, found {:?}",
                        handler.kind, header.kind
                    ))
                    .in_chunk(header.tag, None));
                }

                let mut reader = ChunkReader::new(&mut input, header);
                (handler.load)(&mut world, &mut reader).map_err(|e| e.in_chunk(header.tag, None))?;
                if !reader.is_finished() {
                    return Err(SaveLoadError::corrupt("chunk payload not fully read").in_chunk(header.tag, None));
                }
                debug!(
                    tag = %header.tag,
                    kind = ?header.kind,
                    elements = reader.elements(),
                    "chunk loaded"
                );

                if header.last {
                    if !input.is_empty() {
                        return Err(SaveLoadError::corrupt(format!(
                            "{} bytes after the last chunk",
                            input.remaining()
                        )));
                    }
                    this.world = Some(world);
                    return Ok(());
                }
            }

            // Every save ends with a chunk flagged last.
            Err(SaveLoadError::UnexpectedEof {
                needed: 5,
                remaining: 0,
            })
        })
    }

    /// Turn every stored index into a live handle.
    pub fn resolve_pointers(&mut self) -> Result<()> {
        self.advance(LoadPhase::ChunksRawLoaded, LoadPhase::PointersResolved, |this| {
            let version = this.version;
            let world = this.world_mut()?;
            let refs = world.reference_table();
            let ctx = FixupContext {
                version,
                refs: &refs,
            };
            for handler in W::chunk_handlers() {
                if let Some(fixup) = handler.fixup {
                    fixup(world, &ctx).map_err(|e| e.in_chunk(handler.tag, None))?;
                }
            }
            Ok(())
        })
    }

    /// Run post-load hooks, then applicable migrations.
    pub fn apply_post_load(&mut self) -> Result<()> {
        self.advance(
            LoadPhase::PointersResolved,
            LoadPhase::PostLoadMigrationsApplied,
            |this| {
                let version = this.version;
                let world = this.world_mut()?;
                for handler in W::chunk_handlers() {
                    if let Some(post_load) = handler.post_load {
                        post_load(world, &version).map_err(|e| e.in_chunk(handler.tag, None))?;
                    }
                }
                W::migrations()
                    .run(world, &version)
                    .map_err(|e| SaveLoadError::Migration {
                        name: e.name(),
                        reason: e.to_string(),
                    })?;
                Ok(())
            },
        )
    }

    /// Hand over the finished world.
    pub fn finish(mut self) -> Result<W> {
        self.advance(
            LoadPhase::PostLoadMigrationsApplied,
            LoadPhase::Ready,
            |this| {
                this.world
                    .take()
                    .ok_or_else(|| SaveLoadError::corrupt("no world under construction"))
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Load a complete world from `data`.
pub fn load<W: SaveGame>(data: &[u8], config: &W::Config) -> Result<W> {
    let mut loader = Loader::<W>::new(data);
    let version = loader.identify_format()?;
    loader.load_chunks(config)?;
    loader.resolve_pointers()?;
    loader.apply_post_load()?;
    let world = loader.finish()?;
    info!(%version, "savegame loaded");
    Ok(world)
}

/// Read all of `reader` and load a world from it.
pub fn load_from<W: SaveGame, R: Read>(mut reader: R, config: &W::Config) -> Result<W> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    load(&data, config)
}

/// Serialize `world` in the current format.
pub fn save<W: SaveGame>(world: &W) -> Vec<u8> {
    let mut out = SaveBuffer::new();
    FormatVersion::CURRENT.write_header(out.vec_mut());

    let handlers: Vec<_> = W::chunk_handlers()
        .iter()
        .filter_map(|h| h.save.map(|save| (h, save)))
        .collect();
    for (i, (handler, save)) in handlers.iter().enumerate() {
        let header = ChunkHeader {
            tag: handler.tag,
            kind: handler.kind,
            last: i + 1 == handlers.len(),
        };
        let mut writer = ChunkWriter::new(&mut out, header);
        save(world, &mut writer);
        let elements = writer.finish();
        debug!(tag = %handler.tag, kind = ?handler.kind, elements, "chunk saved");
    }
    info!(bytes = out.len(), "savegame written");
    out.into_bytes()
}

/// Serialize `world` into `writer`.
pub fn save_to<W: SaveGame, O: Write>(world: &W, mut writer: O) -> Result<()> {
    writer.write_all(&save(world))?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{CHUNK_LAST, fixup_pool, load_pool, save_pool};
    use crate::conv::FileType;
    use crate::descriptor::{reference_field, scalar_field};
    use crate::migration::MigrationError;
    use crate::pool::{Pool, SlotState};
    use crate::reference::{Link, Pooled, RefKind};
    use crate::schema::Schema;
    use crate::field;
    use std::sync::LazyLock;

    // -----------------------------------------------------------------------
    // A two-pool world with references in both directions
    // -----------------------------------------------------------------------

    #[derive(Debug, Default)]
    struct Depot {
        id: u16,
        parked: Link<Truck>,
    }

    #[derive(Debug, Default)]
    struct Truck {
        load: u8,
        home: Link<Depot>,
    }

    impl Pooled for Depot {
        const KIND: RefKind = RefKind::Station;
    }

    impl Pooled for Truck {
        const KIND: RefKind = RefKind::Vehicle;
    }

    #[derive(Debug)]
    struct Yard {
        depots: Pool<Depot>,
        trucks: Pool<Truck>,
        migrated: usize,
        repaired: bool,
    }

    static DEPOT_DESC: LazyLock<Schema<Depot>> = LazyLock::new(|| {
        Schema::new(vec![
            scalar_field(FileType::U16, field!(Depot, id)),
            reference_field(field!(Depot, parked)),
        ])
    });

    static TRUCK_DESC: LazyLock<Schema<Truck>> = LazyLock::new(|| {
        Schema::new(vec![
            scalar_field(FileType::U8, field!(Truck, load)),
            reference_field(field!(Truck, home)),
        ])
    });

    const DEPO: ChunkTag = ChunkTag::new(b"DEPO");
    const TRUK: ChunkTag = ChunkTag::new(b"TRUK");

    fn save_depots(y: &Yard, w: &mut ChunkWriter<'_>) {
        save_pool(w, &y.depots, &DEPOT_DESC, &());
    }

    fn load_depots(y: &mut Yard, r: &mut ChunkReader<'_, '_>) -> Result<()> {
        load_pool(r, &mut y.depots, &DEPOT_DESC, &mut ())
    }

    fn fixup_depots(y: &mut Yard, ctx: &FixupContext<'_>) -> Result<()> {
        fixup_pool(DEPO, &mut y.depots, &DEPOT_DESC, &mut (), ctx)
    }

    fn save_trucks(y: &Yard, w: &mut ChunkWriter<'_>) {
        save_pool(w, &y.trucks, &TRUCK_DESC, &());
    }

    fn load_trucks(y: &mut Yard, r: &mut ChunkReader<'_, '_>) -> Result<()> {
        load_pool(r, &mut y.trucks, &TRUCK_DESC, &mut ())
    }

    fn fixup_trucks(y: &mut Yard, ctx: &FixupContext<'_>) -> Result<()> {
        fixup_pool(TRUK, &mut y.trucks, &TRUCK_DESC, &mut (), ctx)
    }

    fn repair(y: &mut Yard, _: &FormatVersion) -> Result<()> {
        y.repaired = true;
        Ok(())
    }

    fn count_trucks(y: &mut Yard, _: &FormatVersion) -> std::result::Result<usize, MigrationError> {
        y.migrated = y.trucks.len();
        Ok(y.migrated)
    }

    fn any(_: &FormatVersion) -> bool {
        true
    }

    static HANDLERS: [ChunkHandler<Yard>; 2] = [
        ChunkHandler {
            tag: DEPO,
            kind: ChunkKind::Array,
            save: Some(save_depots),
            load: load_depots,
            fixup: Some(fixup_depots),
            post_load: Some(repair),
        },
        ChunkHandler {
            tag: TRUK,
            kind: ChunkKind::Array,
            save: Some(save_trucks),
            load: load_trucks,
            fixup: Some(fixup_trucks),
            post_load: None,
        },
    ];

    impl SaveGame for Yard {
        type Config = usize;

        fn chunk_handlers() -> &'static [ChunkHandler<Self>] {
            &HANDLERS
        }

        fn empty(capacity: &usize) -> Self {
            Yard {
                depots: Pool::new("depots", *capacity),
                trucks: Pool::new("trucks", *capacity),
                migrated: 0,
                repaired: false,
            }
        }

        fn reference_table(&self) -> ReferenceTable {
            ReferenceTable::new()
                .with_pool(Depot::KIND, &self.depots)
                .with_pool(Truck::KIND, &self.trucks)
        }

        fn migrations() -> MigrationRegistry<Self> {
            MigrationRegistry::new().with("count_trucks", any, count_trucks)
        }
    }

    fn cyclic_yard() -> Yard {
        let mut y = Yard::empty(&16);
        let d = y.depots.insert_at(0, Depot { id: 42, ..Default::default() }).unwrap();
        let t = y
            .trucks
            .insert_at(
                5,
                Truck {
                    load: 9,
                    home: Link::live(d),
                },
            )
            .unwrap();
        y.depots.get_mut(d).unwrap().parked = Link::live(t);
        y
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[test]
    fn cyclic_references_round_trip() {
        let bytes = save(&cyclic_yard());
        let y: Yard = load(&bytes, &16).unwrap();

        let depot_handle = y.depots.handle_at(0).unwrap();
        let truck_handle = y.trucks.handle_at(5).unwrap();
        let depot = y.depots.get(depot_handle).unwrap();
        let truck = y.trucks.get(truck_handle).unwrap();
        assert_eq!(depot.id, 42);
        assert_eq!(depot.parked, Link::live(truck_handle));
        assert_eq!(truck.home, Link::live(depot_handle));
        assert!(y.repaired);
        assert_eq!(y.migrated, 1);
    }

    #[test]
    fn chunk_order_does_not_matter() {
        let bytes = save(&cyclic_yard());
        // Swap the two chunks: header is 8 bytes, DEPO comes first.
        let body = &bytes[8..];
        let split = body.windows(4).position(|w| w == b"TRUK").unwrap();
        let (depo, truk) = body.split_at(split);
        let mut swapped = bytes[..8].to_vec();
        let mut truk = truk.to_vec();
        let mut depo = depo.to_vec();
        truk[4] &= !CHUNK_LAST;
        depo[4] |= CHUNK_LAST;
        swapped.extend_from_slice(&truk);
        swapped.extend_from_slice(&depo);

        let y: Yard = load(&swapped, &16).unwrap();
        let t = y.trucks.handle_at(5).unwrap();
        assert_eq!(y.depots.get_index(0).unwrap().parked, Link::live(t));
    }

    #[test]
    fn phases_advance_in_order() {
        let bytes = save(&cyclic_yard());
        let mut loader = Loader::<Yard>::new(&bytes);
        assert_eq!(loader.phase(), LoadPhase::Unopened);
        assert!(matches!(
            loader.resolve_pointers(),
            Err(SaveLoadError::OutOfOrder {
                expected: LoadPhase::ChunksRawLoaded,
                actual: LoadPhase::Unopened
            })
        ));
        assert_eq!(loader.phase(), LoadPhase::Unopened);

        assert_eq!(loader.identify_format().unwrap(), FormatVersion::CURRENT);
        loader.load_chunks(&16).unwrap();
        assert_eq!(loader.phase(), LoadPhase::ChunksRawLoaded);
        let raw = loader.world().unwrap();
        assert_eq!(raw.trucks.get_index(5).unwrap().home, Link::Pending(0));

        loader.resolve_pointers().unwrap();
        assert_eq!(loader.phase(), LoadPhase::PointersResolved);
        loader.apply_post_load().unwrap();
        assert_eq!(loader.phase(), LoadPhase::PostLoadMigrationsApplied);
        assert!(loader.finish().is_ok());
    }

    #[test]
    fn dangling_reference_is_fatal_and_drops_world() {
        let mut y = cyclic_yard();
        y.trucks.get_index_mut(5).unwrap().home = Link::Pending(3);
        let bytes = save(&y);

        let mut loader = Loader::<Yard>::new(&bytes);
        loader.identify_format().unwrap();
        loader.load_chunks(&16).unwrap();
        let err = loader.resolve_pointers().unwrap_err();
        assert_eq!(loader.phase(), LoadPhase::Corrupt);
        assert!(loader.world().is_none());
        assert_eq!(err.location(), Some((TRUK, Some(5))));
        assert!(matches!(
            err.root(),
            SaveLoadError::ReferenceOutOfRange {
                kind: RefKind::Station,
                id: 3
            }
        ));
    }

    #[test]
    fn small_pool_is_allocation_exhausted() {
        let bytes = save(&cyclic_yard());
        let err = load::<Yard>(&bytes, &4).unwrap_err();
        assert_eq!(err.location(), Some((TRUK, Some(5))));
        assert!(matches!(err.root(), SaveLoadError::AllocationExhausted { .. }));
    }

    #[test]
    fn unknown_and_duplicate_chunks_are_fatal() {
        let bytes = save(&cyclic_yard());

        let mut unknown = bytes.clone();
        unknown[8..12].copy_from_slice(b"XXXX");
        let err = load::<Yard>(&unknown, &16).unwrap_err();
        assert!(matches!(err, SaveLoadError::UnknownChunk(t) if t == ChunkTag::new(b"XXXX")));

        let body = &bytes[8..];
        let split = body.windows(4).position(|w| w == b"TRUK").unwrap();
        let mut dup = bytes[..8].to_vec();
        dup.extend_from_slice(&body[..split]);
        dup.extend_from_slice(&body[..split]);
        dup.extend_from_slice(&body[split..]);
        let err = load::<Yard>(&dup, &16).unwrap_err();
        assert!(matches!(err, SaveLoadError::DuplicateChunk(t) if t == DEPO));
    }

    #[test]
    fn trailing_bytes_and_truncation_are_corrupt() {
        let mut bytes = save(&cyclic_yard());
        bytes.push(0);
        assert!(load::<Yard>(&bytes, &16).unwrap_err().is_corrupt());

        bytes.truncate(bytes.len() - 3);
        assert!(load::<Yard>(&bytes, &16).unwrap_err().is_corrupt());
    }

    #[test]
    fn header_without_chunks_is_truncated() {
        let mut bytes = Vec::new();
        FormatVersion::CURRENT.write_header(&mut bytes);
        let err = load::<Yard>(&bytes, &16).unwrap_err();
        assert!(matches!(err, SaveLoadError::UnexpectedEof { .. }));
        assert!(err.is_corrupt());

        let mut loader = Loader::<Yard>::new(&bytes);
        loader.identify_format().unwrap();
        assert!(loader.load_chunks(&16).is_err());
        assert_eq!(loader.phase(), LoadPhase::Corrupt);
        assert!(loader.world().is_none());
    }

    #[test]
    fn bad_magic_is_not_corrupt() {
        let err = load::<Yard>(b"ZZZZ\0\0\0\0", &16).unwrap_err();
        assert!(matches!(err, SaveLoadError::FormatUnrecognized(_)));
        assert!(!err.is_corrupt());
    }

    #[test]
    fn save_to_and_load_from_streams() {
        let mut sink = Vec::new();
        save_to(&cyclic_yard(), &mut sink).unwrap();
        let y: Yard = load_from(sink.as_slice(), &16).unwrap();
        assert_eq!(y.trucks.len(), 1);
    }

    #[test]
    fn retired_elements_reach_the_loader() {
        let mut y = cyclic_yard();
        y.trucks.retire_at(2).unwrap();
        let bytes = save(&y);
        let back: Yard = load(&bytes, &16).unwrap();
        assert_eq!(back.trucks.slot_state(2), SlotState::Retired);
    }
}
