//! Field descriptors: the vocabulary schemas are written in.
//!
//! A [`FieldDescriptor`] names one persisted value, where it lives
//! ([`Place`]), how it is encoded, and in which file versions it exists.
//! Descriptors are built with the factory functions in this module and the
//! [`field!`](crate::field) / [`global!`](crate::global) macros, for example:
//!
//! ```rust,ignore
//! scalar_field(FileType::U16, field!(Town, population)).available(Availability::since(3))
//! ```
//!
//! The memory half of every conversion comes from the accessor's Rust type,
//! so a descriptor whose memory width disagrees with its field cannot be
//! constructed.

use crate::buffer::{LoadBuffer, SaveBuffer};
use crate::conv::{Conversion, FileType, MemScalar};
use crate::error::Result;
use crate::reference::{FixupContext, Link, Pooled, RefKind, ReferenceTable};
use crate::schema::Schema;
use crate::version::{Availability, FormatVersion};

// ---------------------------------------------------------------------------
// Addressing
// ---------------------------------------------------------------------------

/// A named pair of projections from `S` to one of its fields.
pub struct Accessor<S, V> {
    pub name: &'static str,
    get: fn(&S) -> &V,
    get_mut: fn(&mut S) -> &mut V,
}

impl<S, V> Accessor<S, V> {
    pub const fn new(name: &'static str, get: fn(&S) -> &V, get_mut: fn(&mut S) -> &mut V) -> Self {
        Self { name, get, get_mut }
    }

    pub fn get<'a>(&self, s: &'a S) -> &'a V {
        (self.get)(s)
    }

    pub fn get_mut<'a>(&self, s: &'a mut S) -> &'a mut V {
        (self.get_mut)(s)
    }
}

/// Where a field's value lives: in the object being processed, or in the
/// staging context shared by every object of one chunk pass.
pub enum Place<T, G, V> {
    Instance(Accessor<T, V>),
    Global(Accessor<G, V>),
}

impl<T, G, V> Place<T, G, V> {
    pub fn name(&self) -> &'static str {
        match self {
            Place::Instance(a) => a.name,
            Place::Global(a) => a.name,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Place::Global(_))
    }

    pub fn get<'a>(&self, obj: &'a T, g: &'a G) -> &'a V {
        match self {
            Place::Instance(a) => a.get(obj),
            Place::Global(a) => a.get(g),
        }
    }

    pub fn get_mut<'a>(&self, obj: &'a mut T, g: &'a mut G) -> &'a mut V {
        match self {
            Place::Instance(a) => a.get_mut(obj),
            Place::Global(a) => a.get_mut(g),
        }
    }
}

/// Build an [`Accessor`] for a field path of `$t`.
#[macro_export]
macro_rules! accessor {
    ($t:ty, $($path:tt)+) => {
        $crate::descriptor::Accessor::<$t, _>::new(
            stringify!($($path)+),
            |o| &o.$($path)+,
            |o| &mut o.$($path)+,
        )
    };
}

/// Per-instance [`Place`] for a field path of `$t`.
#[macro_export]
macro_rules! field {
    ($t:ty, $($path:tt)+) => {
        $crate::descriptor::Place::Instance($crate::accessor!($t, $($path)+))
    };
}

/// Staging-context [`Place`] for a field path of `$g`.
#[macro_export]
macro_rules! global {
    ($g:ty, $($path:tt)+) => {
        $crate::descriptor::Place::Global($crate::accessor!($g, $($path)+))
    };
}

// ---------------------------------------------------------------------------
// Flags and metadata
// ---------------------------------------------------------------------------

/// Per-field behaviour flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldFlags(pub u8);

impl FieldFlags {
    pub const NONE: FieldFlags = FieldFlags(0);
    /// Never written or read.
    pub const NOT_IN_SAVE: FieldFlags = FieldFlags(1 << 0);
    /// Persisted, but not sent to network peers.
    pub const NO_NETWORK_SYNC: FieldFlags = FieldFlags(1 << 1);

    pub const fn contains(self, other: FieldFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: FieldFlags) -> FieldFlags {
        FieldFlags(self.0 | other.0)
    }
}

/// How stored text is cleaned up on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StringPolicy(pub u8);

impl StringPolicy {
    pub const PLAIN: StringPolicy = StringPolicy(0);
    /// Rendered between double quotes in diagnostics.
    pub const QUOTED: StringPolicy = StringPolicy(1 << 0);
    /// Control characters are kept.
    pub const ALLOW_CONTROL: StringPolicy = StringPolicy(1 << 1);
    /// Newlines are kept.
    pub const ALLOW_NEWLINE: StringPolicy = StringPolicy(1 << 2);

    pub const fn contains(self, other: StringPolicy) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: StringPolicy) -> StringPolicy {
        StringPolicy(self.0 | other.0)
    }

    /// Replace disallowed characters with `?` and cut the text to at most
    /// `max_len` bytes on a character boundary.
    pub fn sanitize(self, raw: &[u8], max_len: Option<usize>) -> String {
        let mut text: String = String::from_utf8_lossy(raw)
            .chars()
            .map(|c| {
                let keep = !c.is_control()
                    || self.contains(StringPolicy::ALLOW_CONTROL)
                    || (c == '\n' && self.contains(StringPolicy::ALLOW_NEWLINE));
                if keep { c } else { '?' }
            })
            .collect();
        if let Some(max) = max_len {
            truncate_at_boundary(&mut text, max);
        }
        text
    }

    pub fn display(self, text: &str) -> String {
        if self.contains(StringPolicy::QUOTED) {
            format!("\"{text}\"")
        } else {
            text.to_string()
        }
    }
}

pub(crate) fn truncate_at_boundary(text: &mut String, max: usize) {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
}

/// Name, lifetime and flags shared by every value-carrying descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: &'static str,
    pub availability: Availability,
    pub flags: FieldFlags,
}

impl FieldMeta {
    fn named(name: &'static str) -> Self {
        Self {
            name,
            availability: Availability::always(),
            flags: FieldFlags::NONE,
        }
    }

    /// Whether the field occupies bytes in a file of format `fv`.
    pub fn is_valid(&self, fv: &FormatVersion) -> bool {
        !self.flags.contains(FieldFlags::NOT_IN_SAVE) && self.availability.is_valid(fv)
    }
}

// ---------------------------------------------------------------------------
// Type-erased slots
// ---------------------------------------------------------------------------

/// A scalar field, seen through its widened value.
pub trait ScalarSlot<T, G>: Send + Sync {
    fn get(&self, obj: &T, g: &G) -> i64;
    fn set(&self, obj: &mut T, g: &mut G, value: i64);
}

impl<T, G, V: MemScalar> ScalarSlot<T, G> for Place<T, G, V> {
    fn get(&self, obj: &T, g: &G) -> i64 {
        Place::get(self, obj, g).to_i64()
    }

    fn set(&self, obj: &mut T, g: &mut G, value: i64) {
        *Place::get_mut(self, obj, g) = V::from_i64(value);
    }
}

/// A fixed-size array of scalars.
pub trait ArraySlot<T, G>: Send + Sync {
    fn capacity(&self) -> usize;
    fn get(&self, obj: &T, g: &G, i: usize) -> i64;
    fn set(&self, obj: &mut T, g: &mut G, i: usize, value: i64);
}

impl<T, G, V: MemScalar, const N: usize> ArraySlot<T, G> for Place<T, G, [V; N]> {
    fn capacity(&self) -> usize {
        N
    }

    fn get(&self, obj: &T, g: &G, i: usize) -> i64 {
        Place::get(self, obj, g)[i].to_i64()
    }

    fn set(&self, obj: &mut T, g: &mut G, i: usize, value: i64) {
        Place::get_mut(self, obj, g)[i] = V::from_i64(value);
    }
}

/// An owned string.
pub trait StringSlot<T, G>: Send + Sync {
    fn get<'a>(&self, obj: &'a T, g: &'a G) -> &'a str;
    fn set(&self, obj: &mut T, g: &mut G, value: String);
}

impl<T, G> StringSlot<T, G> for Place<T, G, String> {
    fn get<'a>(&self, obj: &'a T, g: &'a G) -> &'a str {
        Place::get(self, obj, g).as_str()
    }

    fn set(&self, obj: &mut T, g: &mut G, value: String) {
        *Place::get_mut(self, obj, g) = value;
    }
}

/// A single [`Link`].
pub trait RefSlot<T, G>: Send + Sync {
    fn index(&self, obj: &T, g: &G) -> Option<u32>;
    fn set_index(&self, obj: &mut T, g: &mut G, index: Option<u32>);
    fn resolve(&self, obj: &mut T, g: &mut G, kind: RefKind, refs: &ReferenceTable) -> Result<()>;
}

impl<T, G, P: Pooled> RefSlot<T, G> for Place<T, G, Link<P>> {
    fn index(&self, obj: &T, g: &G) -> Option<u32> {
        Place::get(self, obj, g).index()
    }

    fn set_index(&self, obj: &mut T, g: &mut G, index: Option<u32>) {
        *Place::get_mut(self, obj, g) = Link::from_index(index);
    }

    fn resolve(&self, obj: &mut T, g: &mut G, kind: RefKind, refs: &ReferenceTable) -> Result<()> {
        Place::get_mut(self, obj, g).resolve(kind, refs)
    }
}

/// An ordered list of [`Link`]s.
pub trait RefListSlot<T, G>: Send + Sync {
    fn indices(&self, obj: &T, g: &G) -> Vec<Option<u32>>;
    fn set_indices(&self, obj: &mut T, g: &mut G, indices: Vec<u32>);
    fn resolve(&self, obj: &mut T, g: &mut G, kind: RefKind, refs: &ReferenceTable) -> Result<()>;
}

impl<T, G, P: Pooled> RefListSlot<T, G> for Place<T, G, Vec<Link<P>>> {
    fn indices(&self, obj: &T, g: &G) -> Vec<Option<u32>> {
        Place::get(self, obj, g).iter().map(Link::index).collect()
    }

    fn set_indices(&self, obj: &mut T, g: &mut G, indices: Vec<u32>) {
        *Place::get_mut(self, obj, g) = indices.into_iter().map(Link::Pending).collect();
    }

    fn resolve(&self, obj: &mut T, g: &mut G, kind: RefKind, refs: &ReferenceTable) -> Result<()> {
        let list = Place::get_mut(self, obj, g);
        for i in 0..list.len() {
            if let Err(e) = list[i].resolve(kind, refs) {
                list.truncate(i);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Another schema interpreted over a part of the object.
pub trait NestedSchema<T, G>: Send + Sync {
    fn length(&self, obj: &T, g: &G, fv: &FormatVersion) -> usize;
    fn write(&self, obj: &T, g: &G, out: &mut SaveBuffer);
    fn read(&self, obj: &mut T, g: &mut G, input: &mut LoadBuffer<'_>) -> Result<()>;
    fn fixup(&self, obj: &mut T, g: &mut G, ctx: &FixupContext<'_>) -> Result<()>;
    fn collect_sync_fields(&self, out: &mut Vec<&'static str>);
    fn depth(&self) -> usize;
}

/// An include of `schema` over the part of `T` selected by `accessor`.
pub struct Projection<T, G: 'static, U: 'static> {
    schema: &'static Schema<U, G>,
    accessor: Accessor<T, U>,
}

impl<T, G, U> NestedSchema<T, G> for Projection<T, G, U>
where
    T: 'static,
    G: 'static,
    U: 'static,
{
    fn length(&self, obj: &T, g: &G, fv: &FormatVersion) -> usize {
        self.schema.length(self.accessor.get(obj), g, fv)
    }

    fn write(&self, obj: &T, g: &G, out: &mut SaveBuffer) {
        self.schema.write(self.accessor.get(obj), g, out);
    }

    fn read(&self, obj: &mut T, g: &mut G, input: &mut LoadBuffer<'_>) -> Result<()> {
        self.schema.read(self.accessor.get_mut(obj), g, input)
    }

    fn fixup(&self, obj: &mut T, g: &mut G, ctx: &FixupContext<'_>) -> Result<()> {
        self.schema.fixup(self.accessor.get_mut(obj), g, ctx)
    }

    fn collect_sync_fields(&self, out: &mut Vec<&'static str>) {
        out.extend(self.schema.sync_fields());
    }

    fn depth(&self) -> usize {
        1 + self.schema.include_depth()
    }
}

// ---------------------------------------------------------------------------
// FieldDescriptor
// ---------------------------------------------------------------------------

/// One entry of a [`Schema`].
pub enum FieldDescriptor<T, G = ()> {
    Scalar {
        conv: Conversion,
        slot: Box<dyn ScalarSlot<T, G>>,
        meta: FieldMeta,
    },
    Reference {
        kind: RefKind,
        slot: Box<dyn RefSlot<T, G>>,
        meta: FieldMeta,
    },
    /// The first `len` elements of an array are persisted.
    FixedArray {
        conv: Conversion,
        len: usize,
        slot: Box<dyn ArraySlot<T, G>>,
        meta: FieldMeta,
    },
    String {
        policy: StringPolicy,
        max_len: Option<usize>,
        slot: Box<dyn StringSlot<T, G>>,
        meta: FieldMeta,
    },
    /// On disk: references ended by the none-sentinel.
    ReferenceList {
        kind: RefKind,
        slot: Box<dyn RefListSlot<T, G>>,
        meta: FieldMeta,
    },
    Padding {
        len: usize,
        availability: Availability,
    },
    /// Written on save, counted by length, never read back.
    ConstantByte {
        value: u8,
        availability: Availability,
    },
    Include(Box<dyn NestedSchema<T, G>>),
    End,
}

impl<T, G> FieldDescriptor<T, G> {
    /// Restrict the field to the given version windows.
    pub fn available(mut self, availability: Availability) -> Self {
        match &mut self {
            FieldDescriptor::Scalar { meta, .. }
            | FieldDescriptor::Reference { meta, .. }
            | FieldDescriptor::FixedArray { meta, .. }
            | FieldDescriptor::String { meta, .. }
            | FieldDescriptor::ReferenceList { meta, .. } => meta.availability = availability,
            FieldDescriptor::Padding { availability: a, .. }
            | FieldDescriptor::ConstantByte { availability: a, .. } => *a = availability,
            FieldDescriptor::Include(_) | FieldDescriptor::End => {}
        }
        self
    }

    pub fn with_flags(mut self, flags: FieldFlags) -> Self {
        if let Some(meta) = self.meta_mut() {
            meta.flags = meta.flags.union(flags);
        }
        self
    }

    pub fn meta(&self) -> Option<&FieldMeta> {
        match self {
            FieldDescriptor::Scalar { meta, .. }
            | FieldDescriptor::Reference { meta, .. }
            | FieldDescriptor::FixedArray { meta, .. }
            | FieldDescriptor::String { meta, .. }
            | FieldDescriptor::ReferenceList { meta, .. } => Some(meta),
            _ => None,
        }
    }

    fn meta_mut(&mut self) -> Option<&mut FieldMeta> {
        match self {
            FieldDescriptor::Scalar { meta, .. }
            | FieldDescriptor::Reference { meta, .. }
            | FieldDescriptor::FixedArray { meta, .. }
            | FieldDescriptor::String { meta, .. }
            | FieldDescriptor::ReferenceList { meta, .. } => Some(meta),
            _ => None,
        }
    }

    /// Whether the field occupies bytes in a file of format `fv`.
    /// Includes are always entered; their own fields decide.
    pub fn is_valid(&self, fv: &FormatVersion) -> bool {
        match self {
            FieldDescriptor::Padding { availability, .. }
            | FieldDescriptor::ConstantByte { availability, .. } => availability.is_valid(fv),
            FieldDescriptor::Include(_) => true,
            FieldDescriptor::End => false,
            other => other.meta().is_some_and(|m| m.is_valid(fv)),
        }
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// A scalar stored as `file` on disk.
pub fn scalar_field<T, G, V: MemScalar>(file: FileType, place: Place<T, G, V>) -> FieldDescriptor<T, G>
where
    Place<T, G, V>: ScalarSlot<T, G> + 'static,
{
    FieldDescriptor::Scalar {
        conv: Conversion::new(file, V::MEM),
        meta: FieldMeta::named(place.name()),
        slot: Box::new(place),
    }
}

/// A reference to the pool of `P`.
pub fn reference_field<T, G, P: Pooled>(place: Place<T, G, Link<P>>) -> FieldDescriptor<T, G>
where
    Place<T, G, Link<P>>: RefSlot<T, G> + 'static,
{
    reference_of_kind(P::KIND, place)
}

/// A reference with an explicit encoding kind that resolves into `P`'s pool.
///
/// # Panics
///
/// Panics if `kind` does not resolve into `P`'s pool.
pub fn reference_of_kind<T, G, P: Pooled>(kind: RefKind, place: Place<T, G, Link<P>>) -> FieldDescriptor<T, G>
where
    Place<T, G, Link<P>>: RefSlot<T, G> + 'static,
{
    assert_eq!(kind.pool_kind(), P::KIND, "reference kind mismatch for {}", place.name());
    FieldDescriptor::Reference {
        kind,
        meta: FieldMeta::named(place.name()),
        slot: Box::new(place),
    }
}

/// A whole array of `N` scalars.
pub fn array_field<T, G, V: MemScalar, const N: usize>(
    file: FileType,
    place: Place<T, G, [V; N]>,
) -> FieldDescriptor<T, G>
where
    Place<T, G, [V; N]>: ArraySlot<T, G> + 'static,
{
    array_prefix_field(file, Prefix::<N>, place)
}

/// Length marker for [`array_prefix_field`].
#[derive(Debug, Clone, Copy)]
pub struct Prefix<const LEN: usize>;

/// The first `LEN` elements of an array of `N` scalars.
pub fn array_prefix_field<T, G, V: MemScalar, const LEN: usize, const N: usize>(
    file: FileType,
    _len: Prefix<LEN>,
    place: Place<T, G, [V; N]>,
) -> FieldDescriptor<T, G>
where
    Place<T, G, [V; N]>: ArraySlot<T, G> + 'static,
{
    const { assert!(LEN > 0 && LEN <= N && LEN <= u16::MAX as usize) };
    FieldDescriptor::FixedArray {
        conv: Conversion::new(file, V::MEM),
        len: LEN,
        meta: FieldMeta::named(place.name()),
        slot: Box::new(place),
    }
}

/// A string, cut to `max_len` bytes on load when a limit is given.
pub fn string_field<T, G>(policy: StringPolicy, max_len: Option<usize>, place: Place<T, G, String>) -> FieldDescriptor<T, G>
where
    Place<T, G, String>: StringSlot<T, G> + 'static,
{
    FieldDescriptor::String {
        policy,
        max_len,
        meta: FieldMeta::named(place.name()),
        slot: Box::new(place),
    }
}

/// A list of references to the pool of `P`.
///
/// On disk the list ends at the first none value, so the list must not hold
/// [`Link::Null`] entries when saved.
pub fn reference_list_field<T, G, P: Pooled>(place: Place<T, G, Vec<Link<P>>>) -> FieldDescriptor<T, G>
where
    Place<T, G, Vec<Link<P>>>: RefListSlot<T, G> + 'static,
{
    FieldDescriptor::ReferenceList {
        kind: P::KIND,
        meta: FieldMeta::named(place.name()),
        slot: Box::new(place),
    }
}

/// `len` unused bytes.
pub fn padding<T, G>(len: usize) -> FieldDescriptor<T, G> {
    FieldDescriptor::Padding {
        len,
        availability: Availability::always(),
    }
}

/// A literal byte emitted on save.
pub fn constant_byte<T, G>(value: u8) -> FieldDescriptor<T, G> {
    FieldDescriptor::ConstantByte {
        value,
        availability: Availability::always(),
    }
}

/// Interpret `schema` over the part of `T` selected by `accessor`.
pub fn include<T, G, U>(schema: &'static Schema<U, G>, accessor: Accessor<T, U>) -> FieldDescriptor<T, G>
where
    T: 'static,
    G: 'static,
    U: 'static,
{
    FieldDescriptor::Include(Box::new(Projection { schema, accessor }))
}

pub fn end<T, G>() -> FieldDescriptor<T, G> {
    FieldDescriptor::End
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::MemType;
    use crate::version::VersionWindow;

    #[derive(Default)]
    struct Sample {
        a: u16,
        arr: [i16; 4],
        name: String,
    }

    #[derive(Default)]
    struct Staging {
        counter: u32,
    }

    #[test]
    fn scalar_field_derives_memory_type() {
        let d: FieldDescriptor<Sample> = scalar_field(FileType::U8, field!(Sample, a));
        match d {
            FieldDescriptor::Scalar { conv, meta, .. } => {
                assert_eq!(conv, Conversion::new(FileType::U8, MemType::U16));
                assert_eq!(meta.name, "a");
                assert_eq!(meta.availability, Availability::always());
            }
            _ => panic!("expected scalar"),
        }
    }

    #[test]
    fn global_place_reads_staging() {
        let place: Place<Sample, Staging, u32> = global!(Staging, counter);
        assert!(place.is_global());
        let mut obj = Sample::default();
        let mut g = Staging { counter: 9 };
        assert_eq!(ScalarSlot::get(&place, &obj, &g), 9);
        ScalarSlot::set(&place, &mut obj, &mut g, 12);
        assert_eq!(g.counter, 12);
    }

    #[test]
    fn prefix_array_keeps_declared_length() {
        let d: FieldDescriptor<Sample> = array_prefix_field(FileType::I16, Prefix::<2>, field!(Sample, arr));
        match d {
            FieldDescriptor::FixedArray { len, slot, .. } => {
                assert_eq!(len, 2);
                assert_eq!(slot.capacity(), 4);
            }
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn availability_and_flags_chain() {
        let d: FieldDescriptor<Sample> = string_field(StringPolicy::PLAIN, Some(8), field!(Sample, name))
            .available(Availability::since(4))
            .with_flags(FieldFlags::NO_NETWORK_SYNC);
        let meta = d.meta().unwrap();
        assert_eq!(meta.availability.current, Some(VersionWindow::new(4, 0)));
        assert!(meta.flags.contains(FieldFlags::NO_NETWORK_SYNC));
        assert!(d.is_valid(&FormatVersion::Current { version: 4 }));
        assert!(!d.is_valid(&FormatVersion::Current { version: 3 }));
    }

    #[test]
    fn not_in_save_is_never_valid() {
        let d: FieldDescriptor<Sample> =
            scalar_field(FileType::U16, field!(Sample, a)).with_flags(FieldFlags::NOT_IN_SAVE);
        assert!(!d.is_valid(&FormatVersion::CURRENT));
    }

    #[test]
    fn sanitize_replaces_control_and_truncates() {
        let raw = "ab\u{7}c\nd".as_bytes();
        assert_eq!(StringPolicy::PLAIN.sanitize(raw, None), "ab?c?d");
        assert_eq!(StringPolicy::ALLOW_NEWLINE.sanitize(raw, None), "ab?c\nd");
        assert_eq!(StringPolicy::ALLOW_CONTROL.sanitize(raw, None), "ab\u{7}c\nd");
        assert_eq!(StringPolicy::PLAIN.sanitize("héllo".as_bytes(), Some(2)), "h");
    }

    #[test]
    fn quoted_display() {
        assert_eq!(StringPolicy::QUOTED.display("x"), "\"x\"");
        assert_eq!(StringPolicy::PLAIN.display("x"), "x");
    }
}
