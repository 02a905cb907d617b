//! Cross-pool references and their two-phase resolution.
//!
//! During the raw load a reference field only records the pool index it
//! names ([`Link::Pending`]). Once every chunk is loaded, a
//! [`ReferenceTable`] snapshot of pool occupancy is taken and each pending
//! link is checked against it and turned into a live [`Handle`].

use std::collections::HashMap;
use std::fmt;

use crate::buffer::{LoadBuffer, SaveBuffer};
use crate::error::{Result, SaveLoadError};
use crate::pool::{Handle, Pool, RawHandle};
use crate::version::FormatVersion;

// ---------------------------------------------------------------------------
// Reference kinds
// ---------------------------------------------------------------------------

/// Kind of object a reference field points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefKind {
    Order,
    Vehicle,
    Station,
    Town,
    /// Vehicle reference using the pre-4.4 encoding.
    VehicleOld,
    RoadStop,
    Dock,
    EngineRenew,
    CargoPacket,
    OrderList,
    Storage,
    LinkGraph,
    LinkGraphJob,
}

impl RefKind {
    /// The pool this kind resolves into.
    pub const fn pool_kind(self) -> RefKind {
        match self {
            RefKind::VehicleOld => RefKind::Vehicle,
            other => other,
        }
    }
}

/// A type stored in a pool addressable by references of kind `KIND`.
pub trait Pooled: 'static {
    const KIND: RefKind;
}

/// Turn a raw on-disk reference into a pool index.
pub fn decode_reference(raw: u32, kind: RefKind, fv: &FormatVersion) -> Option<u32> {
    if kind == RefKind::VehicleOld && fv.is_legacy_before(4, 4) {
        return if raw == 0xFFFF { None } else { Some(raw) };
    }
    raw.checked_sub(1)
}

/// Read one reference of `kind` at the width used by the buffer's format.
pub fn read_reference(input: &mut LoadBuffer<'_>, kind: RefKind) -> Result<Option<u32>> {
    let fv = input.version();
    let raw = match fv.reference_width() {
        2 => u32::from(input.read_u16()?),
        _ => input.read_u32()?,
    };
    Ok(decode_reference(raw, kind, &fv))
}

/// Inverse of [`decode_reference`].
pub fn encode_reference(index: Option<u32>, kind: RefKind, fv: &FormatVersion) -> u32 {
    if kind == RefKind::VehicleOld && fv.is_legacy_before(4, 4) {
        return index.unwrap_or(0xFFFF);
    }
    index.map_or(0, |i| i + 1)
}

/// Write one reference of `kind` at the width used by the buffer's format.
pub fn write_reference(out: &mut SaveBuffer, kind: RefKind, index: Option<u32>) {
    let fv = out.version();
    let raw = encode_reference(index, kind, &fv);
    match fv.reference_width() {
        2 => out.write_u16(raw as u16),
        _ => out.write_u32(raw),
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// In-memory reference field.
pub enum Link<T> {
    Null,
    /// Pool index read from disk, not yet checked.
    Pending(u32),
    Live(Handle<T>),
}

impl<T> Link<T> {
    pub fn live(handle: Handle<T>) -> Self {
        Link::Live(handle)
    }

    pub fn from_index(index: Option<u32>) -> Self {
        index.map_or(Link::Null, Link::Pending)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Link::Null)
    }

    /// Pool index named by this link, resolved or not.
    pub fn index(&self) -> Option<u32> {
        match self {
            Link::Null => None,
            Link::Pending(i) => Some(*i),
            Link::Live(h) => Some(h.index()),
        }
    }

    pub fn handle(&self) -> Option<Handle<T>> {
        match self {
            Link::Live(h) => Some(*h),
            _ => None,
        }
    }

    /// Resolve a pending index against `refs`. Null and live links are
    /// left as they are.
    pub fn resolve(&mut self, kind: RefKind, refs: &ReferenceTable) -> Result<()> {
        if let Link::Pending(index) = *self {
            *self = Link::Live(Handle::from_raw(refs.resolve(kind, index)?));
        }
        Ok(())
    }
}

impl<T> Default for Link<T> {
    fn default() -> Self {
        Link::Null
    }
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Link<T> {}

impl<T> PartialEq for Link<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Link::Null, Link::Null) => true,
            (Link::Pending(a), Link::Pending(b)) => a == b,
            (Link::Live(a), Link::Live(b)) => a == b,
            _ => false,
        }
    }
}

impl<T> Eq for Link<T> {}

impl<T> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Null => write!(f, "Null"),
            Link::Pending(i) => write!(f, "Pending({i})"),
            Link::Live(h) => write!(f, "Live({h:?})"),
        }
    }
}

// ---------------------------------------------------------------------------
// ReferenceTable
// ---------------------------------------------------------------------------

/// Per-kind occupancy snapshot used to resolve pending links.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    pools: HashMap<RefKind, Vec<Option<u32>>>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_pool<T>(&mut self, kind: RefKind, pool: &Pool<T>) {
        self.pools.insert(kind.pool_kind(), pool.occupancy());
    }

    pub fn with_pool<T>(mut self, kind: RefKind, pool: &Pool<T>) -> Self {
        self.insert_pool(kind, pool);
        self
    }

    /// Look up the live object at `index` in the pool for `kind`.
    pub fn resolve(&self, kind: RefKind, index: u32) -> Result<RawHandle> {
        self.pools
            .get(&kind.pool_kind())
            .and_then(|slots| slots.get(index as usize).copied().flatten())
            .map(|generation| RawHandle { index, generation })
            .ok_or(SaveLoadError::ReferenceOutOfRange { kind, id: index })
    }
}

/// Everything a pointer-fixup step needs.
#[derive(Debug, Clone, Copy)]
pub struct FixupContext<'a> {
    pub version: FormatVersion,
    pub refs: &'a ReferenceTable,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    #[test]
    fn zero_is_none_and_ids_are_offset() {
        let fv = FormatVersion::CURRENT;
        assert_eq!(decode_reference(0, RefKind::Station, &fv), None);
        assert_eq!(decode_reference(1, RefKind::Station, &fv), Some(0));
        assert_eq!(decode_reference(6, RefKind::Vehicle, &fv), Some(5));
    }

    #[test]
    fn old_vehicle_refs_use_ffff_before_4_4() {
        let old = FormatVersion::Legacy { major: 4, minor: 3 };
        assert_eq!(decode_reference(0xFFFF, RefKind::VehicleOld, &old), None);
        assert_eq!(decode_reference(0, RefKind::VehicleOld, &old), Some(0));

        let new = FormatVersion::Legacy { major: 4, minor: 4 };
        assert_eq!(decode_reference(0, RefKind::VehicleOld, &new), None);
        assert_eq!(decode_reference(3, RefKind::VehicleOld, &new), Some(2));
    }

    #[test]
    fn reference_width_follows_format() {
        let old = FormatVersion::Legacy { major: 60, minor: 0 };
        let mut r = LoadBuffer::new(&[0x00, 0x03], old);
        assert_eq!(read_reference(&mut r, RefKind::Town).unwrap(), Some(2));

        let mut out = SaveBuffer::new();
        write_reference(&mut out, RefKind::Town, Some(2));
        write_reference(&mut out, RefKind::Town, None);
        assert_eq!(out.as_bytes(), &[0, 0, 0, 3, 0, 0, 0, 0]);

        let mut narrow = SaveBuffer::with_version(old);
        write_reference(&mut narrow, RefKind::Town, Some(2));
        assert_eq!(narrow.as_bytes(), &[0, 3]);

        let ancient = FormatVersion::Legacy { major: 4, minor: 0 };
        let mut vehicles = SaveBuffer::with_version(ancient);
        write_reference(&mut vehicles, RefKind::VehicleOld, None);
        write_reference(&mut vehicles, RefKind::VehicleOld, Some(0));
        assert_eq!(vehicles.as_bytes(), &[0xFF, 0xFF, 0, 0]);
    }

    #[test]
    fn resolve_checks_occupancy() {
        let mut pool: Pool<u8> = Pool::new("vehicles", 8);
        pool.insert_at(2, 0).unwrap();
        let refs = ReferenceTable::new().with_pool(RefKind::Vehicle, &pool);

        let raw = refs.resolve(RefKind::VehicleOld, 2).unwrap();
        assert_eq!(raw.index, 2);
        assert!(matches!(
            refs.resolve(RefKind::Vehicle, 1),
            Err(SaveLoadError::ReferenceOutOfRange { id: 1, .. })
        ));
        assert!(refs.resolve(RefKind::Vehicle, 100).is_err());
        assert!(refs.resolve(RefKind::Town, 0).is_err());
    }

    #[test]
    fn link_resolution() {
        let mut pool: Pool<Dummy> = Pool::new("dummy", 4);
        let h = pool.insert_at(1, Dummy).unwrap();
        let refs = ReferenceTable::new().with_pool(RefKind::Town, &pool);

        let mut link: Link<Dummy> = Link::from_index(Some(1));
        link.resolve(RefKind::Town, &refs).unwrap();
        assert_eq!(link.handle(), Some(h));

        let mut null: Link<Dummy> = Link::from_index(None);
        null.resolve(RefKind::Town, &refs).unwrap();
        assert!(null.is_null());

        let mut dangling: Link<Dummy> = Link::Pending(3);
        assert!(dangling.resolve(RefKind::Town, &refs).is_err());
        assert_eq!(dangling, Link::Pending(3));
    }
}
