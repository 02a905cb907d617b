//! The descriptor-table interpreter.
//!
//! A [`Schema`] is an ordered list of [`FieldDescriptor`]s ending in `End`.
//! The same list drives every pass: [`Schema::length`], [`Schema::write`],
//! [`Schema::read`] and the pointer pass [`Schema::fixup`]. A field that is
//! not valid for the file's format occupies no bytes in that file.
//!
//! Schemas are built once and shared, typically from a `LazyLock` static:
//!
//! ```rust,ignore
//! static TOWN_DESC: LazyLock<Schema<Town>> = LazyLock::new(|| {
//!     Schema::new(vec![
//!         scalar_field(FileType::U32, field!(Town, xy)),
//!         string_field(StringPolicy::PLAIN, Some(32), field!(Town, name)),
//!     ])
//! });
//! ```

use tracing::warn;

use crate::buffer::{LoadBuffer, SaveBuffer, gamma_len};
use crate::conv::{put_scalar, read_scalar};
use crate::descriptor::{FieldDescriptor, FieldFlags, truncate_at_boundary};
use crate::error::Result;
use crate::reference::{FixupContext, read_reference, write_reference};
use crate::version::FormatVersion;

/// Deepest chain of nested includes a schema may contain.
pub const MAX_INCLUDE_DEPTH: usize = 8;

/// An immutable, validated field table for objects of type `T`, with `G`
/// as the staging context for global fields.
pub struct Schema<T, G = ()> {
    fields: Vec<FieldDescriptor<T, G>>,
}

impl<T, G> Schema<T, G> {
    /// Build a schema. A trailing `End` is appended when missing.
    ///
    /// # Panics
    ///
    /// Panics if `End` appears anywhere but last, or if includes nest deeper
    /// than [`MAX_INCLUDE_DEPTH`].
    pub fn new(mut fields: Vec<FieldDescriptor<T, G>>) -> Self {
        if !matches!(fields.last(), Some(FieldDescriptor::End)) {
            fields.push(FieldDescriptor::End);
        }
        let schema = Self { fields };
        schema.validate();
        schema
    }

    fn validate(&self) {
        let last = self.fields.len() - 1;
        for (i, field) in self.fields.iter().enumerate() {
            assert!(
                i == last || !matches!(field, FieldDescriptor::End),
                "End descriptor at position {i} is not last"
            );
        }
        assert!(
            self.include_depth() <= MAX_INCLUDE_DEPTH,
            "schema includes nest deeper than {MAX_INCLUDE_DEPTH}"
        );
    }

    pub fn fields(&self) -> &[FieldDescriptor<T, G>] {
        &self.fields
    }

    /// Longest chain of includes below this schema.
    pub fn include_depth(&self) -> usize {
        self.fields
            .iter()
            .map(|f| match f {
                FieldDescriptor::Include(nested) => nested.depth(),
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }

    /// Byte length of `obj` in a file of format `fv`.
    pub fn length(&self, obj: &T, g: &G, fv: &FormatVersion) -> usize {
        let ref_width = fv.reference_width();
        self.fields
            .iter()
            .filter(|f| f.is_valid(fv))
            .map(|field| match field {
                FieldDescriptor::Scalar { conv, .. } => conv.file.size(),
                FieldDescriptor::Reference { .. } => ref_width,
                FieldDescriptor::FixedArray { conv, len, .. } => conv.file.size() * len,
                FieldDescriptor::String { max_len, slot, .. } => {
                    let len = stored_len(slot.get(obj, g), *max_len);
                    gamma_len(len as u32) + len
                }
                FieldDescriptor::ReferenceList { slot, .. } => {
                    (slot.indices(obj, g).iter().flatten().count() + 1) * ref_width
                }
                FieldDescriptor::Padding { len, .. } => *len,
                FieldDescriptor::ConstantByte { .. } => 1,
                FieldDescriptor::Include(nested) => nested.length(obj, g, fv),
                FieldDescriptor::End => 0,
            })
            .sum()
    }

    /// Append `obj` in the layout of `out`'s format.
    pub fn write(&self, obj: &T, g: &G, out: &mut SaveBuffer) {
        let fv = out.version();
        for field in self.fields.iter().filter(|f| f.is_valid(&fv)) {
            match field {
                FieldDescriptor::Scalar { conv, slot, .. } => {
                    put_scalar(out.vec_mut(), slot.get(obj, g), conv.file);
                }
                FieldDescriptor::Reference { kind, slot, .. } => {
                    write_reference(out, *kind, slot.index(obj, g));
                }
                FieldDescriptor::FixedArray {
                    conv, len, slot, ..
                } => {
                    for i in 0..*len {
                        put_scalar(out.vec_mut(), slot.get(obj, g, i), conv.file);
                    }
                }
                FieldDescriptor::String { max_len, slot, .. } => {
                    let text = slot.get(obj, g);
                    let len = stored_len(text, *max_len);
                    out.write_gamma(len as u32);
                    out.write_bytes(&text.as_bytes()[..len]);
                }
                FieldDescriptor::ReferenceList { kind, slot, meta } => {
                    let indices = slot.indices(obj, g);
                    debug_assert!(
                        indices.iter().all(Option::is_some),
                        "null entry in reference list '{}'",
                        meta.name
                    );
                    for index in indices.into_iter().flatten() {
                        write_reference(out, *kind, Some(index));
                    }
                    write_reference(out, *kind, None);
                }
                FieldDescriptor::Padding { len, .. } => {
                    out.write_bytes(&vec![0; *len]);
                }
                FieldDescriptor::ConstantByte { value, .. } => out.write_u8(*value),
                FieldDescriptor::Include(nested) => nested.write(obj, g, out),
                FieldDescriptor::End => {}
            }
        }
    }

    /// Populate `obj` from `input`. References are stored unresolved.
    pub fn read(&self, obj: &mut T, g: &mut G, input: &mut LoadBuffer<'_>) -> Result<()> {
        let fv = input.version();
        for field in self.fields.iter().filter(|f| f.is_valid(&fv)) {
            match field {
                FieldDescriptor::Scalar { conv, slot, .. } => {
                    let raw = input.read_bytes(conv.file.size())?;
                    slot.set(obj, g, read_scalar(raw, *conv)?);
                }
                FieldDescriptor::Reference { kind, slot, .. } => {
                    let index = read_reference(input, *kind)?;
                    slot.set_index(obj, g, index);
                }
                FieldDescriptor::FixedArray {
                    conv, len, slot, ..
                } => {
                    for i in 0..*len {
                        let raw = input.read_bytes(conv.file.size())?;
                        slot.set(obj, g, i, read_scalar(raw, *conv)?);
                    }
                }
                FieldDescriptor::String {
                    policy,
                    max_len,
                    slot,
                    meta,
                } => {
                    let len = input.read_gamma()? as usize;
                    let raw = input.read_bytes(len)?;
                    let text = policy.sanitize(raw, *max_len);
                    if text.as_bytes() != raw {
                        warn!(
                            field = meta.name,
                            stored = %policy.display(&String::from_utf8_lossy(raw)),
                            loaded = %policy.display(&text),
                            "string sanitized on load"
                        );
                    }
                    slot.set(obj, g, text);
                }
                FieldDescriptor::ReferenceList { kind, slot, .. } => {
                    let mut indices = Vec::new();
                    while let Some(index) = read_reference(input, *kind)? {
                        indices.push(index);
                    }
                    slot.set_indices(obj, g, indices);
                }
                FieldDescriptor::Padding { len, .. } => input.skip(*len)?,
                FieldDescriptor::ConstantByte { .. } => {}
                FieldDescriptor::Include(nested) => nested.read(obj, g, input)?,
                FieldDescriptor::End => {}
            }
        }
        Ok(())
    }

    /// Resolve every pending reference of `obj`. A failing reference list
    /// keeps only the entries before the failure.
    pub fn fixup(&self, obj: &mut T, g: &mut G, ctx: &FixupContext<'_>) -> Result<()> {
        for field in &self.fields {
            match field {
                FieldDescriptor::Reference { kind, slot, meta }
                    if !meta.flags.contains(FieldFlags::NOT_IN_SAVE) =>
                {
                    slot.resolve(obj, g, *kind, ctx.refs)?;
                }
                FieldDescriptor::ReferenceList { kind, slot, meta }
                    if !meta.flags.contains(FieldFlags::NOT_IN_SAVE) =>
                {
                    slot.resolve(obj, g, *kind, ctx.refs)?;
                }
                FieldDescriptor::Include(nested) => nested.fixup(obj, g, ctx)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Names of the fields a network peer receives: everything persisted in
    /// the current format that is not flagged `NO_NETWORK_SYNC`.
    pub fn sync_fields(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        for field in &self.fields {
            match field {
                FieldDescriptor::Include(nested) => nested.collect_sync_fields(&mut out),
                other => {
                    let synced = other.meta().filter(|m| {
                        m.is_valid(&FormatVersion::CURRENT)
                            && !m.flags.contains(FieldFlags::NO_NETWORK_SYNC)
                    });
                    out.extend(synced.map(|m| m.name));
                }
            }
        }
        out
    }
}

/// Bytes of `text` that are persisted under `max_len`.
fn stored_len(text: &str, max_len: Option<usize>) -> usize {
    match max_len {
        Some(max) if text.len() > max => {
            let mut owned = text.to_string();
            truncate_at_boundary(&mut owned, max);
            owned.len()
        }
        _ => text.len(),
    }
}
