//! Savegame format identification and version windows.
//!
//! Files come in several dialects. Files written by this engine use the
//! current numbering scheme (`FTTD`). Files written before the renumbering use
//! the legacy scheme (`OTTD`, a major/minor pair). Three predecessor programs
//! (`TTDP`, `TTD`, `TTO`) have no meaningful version at all. A field's
//! lifetime is expressed by an [`Availability`], which holds one
//! [`VersionWindow`] per numbering scheme.

use std::fmt;

use crate::error::{Result, SaveLoadError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Highest current-scheme version this build reads, and the one it writes.
pub const SAVEGAME_VERSION: u16 = 32;

pub const MAGIC_CURRENT: [u8; 4] = *b"FTTD";
pub const MAGIC_LEGACY: [u8; 4] = *b"OTTD";
pub const MAGIC_TTDP: [u8; 4] = *b"TTDP";
pub const MAGIC_TTD: [u8; 4] = *b"TTD\0";
pub const MAGIC_TTO: [u8; 4] = *b"TTO\0";

// ---------------------------------------------------------------------------
// FormatVersion
// ---------------------------------------------------------------------------

/// The dialect and version of one savegame file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatVersion {
    /// Transport Tycoon (original).
    Tto,
    /// Transport Tycoon Deluxe.
    Ttd,
    /// TTDPatch extended format.
    TtdPatch { version: u32 },
    /// Legacy numbering scheme.
    Legacy { major: u16, minor: u8 },
    /// Current numbering scheme.
    Current { version: u16 },
}

impl FormatVersion {
    /// The version every save is written with.
    pub const CURRENT: FormatVersion = FormatVersion::Current {
        version: SAVEGAME_VERSION,
    };

    /// Whether the file uses the current numbering scheme.
    pub fn is_current(&self) -> bool {
        matches!(self, FormatVersion::Current { .. })
    }

    /// Whether the file is exactly the version this build writes.
    pub fn is_latest(&self) -> bool {
        *self == Self::CURRENT
    }

    /// Whether the file comes from one of the predecessor programs.
    pub fn is_predecessor(&self) -> bool {
        matches!(
            self,
            FormatVersion::Tto | FormatVersion::Ttd | FormatVersion::TtdPatch { .. }
        )
    }

    /// Mixed-scheme "older than" test.
    ///
    /// Current-scheme files compare against `version`. Legacy files compare
    /// against `major`/`minor` (a zero `minor` is ignored). Predecessor files
    /// are older than any legacy version with a nonzero major number. Pass
    /// `u16::MAX` as `major` to mean "every legacy file".
    pub fn is_before(&self, version: u16, major: u16, minor: u8) -> bool {
        match *self {
            FormatVersion::Current { version: v } => v < version,
            FormatVersion::Legacy {
                major: m,
                minor: mi,
            } => m < major || (minor > 0 && m == major && mi < minor),
            _ => major > 0,
        }
    }

    /// Legacy-only "older than" test. Never true for current-scheme files.
    pub fn is_legacy_before(&self, major: u16, minor: u8) -> bool {
        self.is_before(0, major, minor)
    }

    /// On-disk width of a reference, in bytes.
    pub fn reference_width(&self) -> usize {
        if self.is_legacy_before(69, 0) { 2 } else { 4 }
    }

    /// Parse a file header. Returns the format and the header length.
    pub fn identify(data: &[u8]) -> Result<(FormatVersion, usize)> {
        let magic: [u8; 4] = match data.get(..4).and_then(|m| m.try_into().ok()) {
            Some(m) => m,
            None => {
                return Err(SaveLoadError::UnexpectedEof {
                    needed: 4,
                    remaining: data.len(),
                });
            }
        };
        match magic {
            MAGIC_CURRENT => {
                let p = header_payload(data)?;
                let version = u16::from_be_bytes([p[0], p[1]]);
                if version > SAVEGAME_VERSION {
                    return Err(SaveLoadError::FutureVersion(version));
                }
                Ok((FormatVersion::Current { version }, 8))
            }
            MAGIC_LEGACY => {
                let p = header_payload(data)?;
                let major = u16::from_be_bytes([p[0], p[1]]);
                Ok((FormatVersion::Legacy { major, minor: p[2] }, 8))
            }
            MAGIC_TTDP => {
                let p = header_payload(data)?;
                let version = u32::from_be_bytes([p[0], p[1], p[2], p[3]]);
                Ok((FormatVersion::TtdPatch { version }, 8))
            }
            MAGIC_TTD => Ok((FormatVersion::Ttd, 4)),
            MAGIC_TTO => Ok((FormatVersion::Tto, 4)),
            other => Err(SaveLoadError::FormatUnrecognized(other)),
        }
    }

    /// Append the header for this format.
    pub fn write_header(&self, out: &mut Vec<u8>) {
        match *self {
            FormatVersion::Current { version } => {
                out.extend_from_slice(&MAGIC_CURRENT);
                out.extend_from_slice(&version.to_be_bytes());
                out.extend_from_slice(&[0, 0]);
            }
            FormatVersion::Legacy { major, minor } => {
                out.extend_from_slice(&MAGIC_LEGACY);
                out.extend_from_slice(&major.to_be_bytes());
                out.extend_from_slice(&[minor, 0]);
            }
            FormatVersion::TtdPatch { version } => {
                out.extend_from_slice(&MAGIC_TTDP);
                out.extend_from_slice(&version.to_be_bytes());
            }
            FormatVersion::Ttd => out.extend_from_slice(&MAGIC_TTD),
            FormatVersion::Tto => out.extend_from_slice(&MAGIC_TTO),
        }
    }
}

/// The four bytes following a magic.
fn header_payload(data: &[u8]) -> Result<&[u8]> {
    data.get(4..8).ok_or(SaveLoadError::UnexpectedEof {
        needed: 4,
        remaining: data.len() - 4,
    })
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatVersion::Tto => write!(f, "TTO"),
            FormatVersion::Ttd => write!(f, "TTD"),
            FormatVersion::TtdPatch { version } => write!(f, "TTDP {version:#x}"),
            FormatVersion::Legacy { major, minor } => write!(f, "legacy {major}.{minor}"),
            FormatVersion::Current { version } => write!(f, "v{version}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Version windows
// ---------------------------------------------------------------------------

/// Inclusive version bounds in one numbering scheme. `to == 0` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionWindow {
    pub from: u16,
    /// Minor lower bound; meaningful only for legacy windows.
    pub from_minor: u8,
    pub to: u16,
}

impl VersionWindow {
    pub const ALL: VersionWindow = VersionWindow::new(0, 0);

    pub const fn new(from: u16, to: u16) -> Self {
        Self {
            from,
            from_minor: 0,
            to,
        }
    }

    pub const fn with_minor(from: u16, from_minor: u8, to: u16) -> Self {
        Self {
            from,
            from_minor,
            to,
        }
    }

    pub fn contains(&self, version: u16) -> bool {
        version >= self.from && (self.to == 0 || version <= self.to)
    }

    pub fn contains_legacy(&self, major: u16, minor: u8) -> bool {
        let above = major > self.from || (major == self.from && minor >= self.from_minor);
        above && (self.to == 0 || major <= self.to)
    }
}

/// The pair of windows that decide whether a field is present in a file.
///
/// A `None` window means "absent in every file of that scheme".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Availability {
    pub current: Option<VersionWindow>,
    pub legacy: Option<VersionWindow>,
}

impl Default for Availability {
    fn default() -> Self {
        Self::always()
    }
}

impl Availability {
    /// Present in every file.
    pub const fn always() -> Self {
        Self {
            current: Some(VersionWindow::ALL),
            legacy: Some(VersionWindow::ALL),
        }
    }

    /// Added in current version `v`; absent from every non-current file.
    pub const fn since(v: u16) -> Self {
        Self {
            current: Some(VersionWindow::new(v, 0)),
            legacy: None,
        }
    }

    /// Removed after current version `v`; present in every legacy file.
    pub const fn until(v: u16) -> Self {
        Self {
            current: Some(VersionWindow::new(0, v)),
            legacy: Some(VersionWindow::ALL),
        }
    }

    /// Present from current version `from` to `to`; absent from every
    /// non-current file.
    pub const fn between(from: u16, to: u16) -> Self {
        Self {
            current: Some(VersionWindow::new(from, to)),
            legacy: None,
        }
    }

    /// Present only in legacy files from `from` to `to`.
    pub const fn legacy_only(from: u16, to: u16) -> Self {
        Self {
            current: None,
            legacy: Some(VersionWindow::new(from, to)),
        }
    }

    /// Build from the four raw bounds. A zero legacy lower bound paired with
    /// a nonzero current lower bound means the field is current-only.
    pub const fn from_bounds(from: u16, to: u16, legacy_from: u16, legacy_to: u16) -> Self {
        let legacy = if legacy_from == 0 && from != 0 {
            None
        } else {
            Some(VersionWindow::new(legacy_from, legacy_to))
        };
        Self {
            current: Some(VersionWindow::new(from, to)),
            legacy,
        }
    }

    /// Replace the legacy window.
    pub const fn legacy(self, from: u16, to: u16) -> Self {
        Self {
            legacy: Some(VersionWindow::new(from, to)),
            ..self
        }
    }

    /// Replace the legacy window with one that starts at `from.from_minor`.
    pub const fn legacy_minor(self, from: u16, from_minor: u8, to: u16) -> Self {
        Self {
            legacy: Some(VersionWindow::with_minor(from, from_minor, to)),
            ..self
        }
    }

    /// Whether the field is present in a file of format `fv`.
    pub fn is_valid(&self, fv: &FormatVersion) -> bool {
        match *fv {
            FormatVersion::Current { version } => {
                self.current.is_some_and(|w| w.contains(version))
            }
            FormatVersion::Legacy { major, minor } => {
                self.legacy.is_some_and(|w| w.contains_legacy(major, minor))
            }
            _ => self.legacy.is_some_and(|w| w.from == 0 && w.from_minor == 0),
        }
    }

    /// Whether the field is present in files this build writes.
    pub fn is_currently_valid(&self) -> bool {
        self.is_valid(&FormatVersion::CURRENT)
    }
}
