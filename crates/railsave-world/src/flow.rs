//! Planned cargo flows through a station.
//!
//! In memory a [`FlowStat`] keeps cumulative shares keyed by their running
//! total, so a random number below the total picks a next hop with one
//! range lookup. On disk each share is stored as its increment over the
//! previous one, one [`FlowRecord`] per share.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::ops::Bound;
use std::sync::LazyLock;

use railsave_core::conv::FileType;
use railsave_core::descriptor::scalar_field;
use railsave_core::{Availability, Result, SaveLoadError, Schema, field};

use crate::ids::StationId;

/// Next hops of cargo from one source, weighted by share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStat {
    /// Cumulative share -> next hop.
    shares: BTreeMap<u32, StationId>,
    /// Cumulative share up to which hops are unrestricted.
    unrestricted: u32,
}

impl FlowStat {
    pub fn new(via: StationId, share: u32, restricted: bool) -> Self {
        debug_assert!(share > 0);
        Self {
            shares: BTreeMap::from([(share, via)]),
            unrestricted: if restricted { 0 } else { share },
        }
    }

    /// Add a hop after every existing one. Unrestricted hops must all come
    /// before the first restricted one.
    pub fn append_share(&mut self, via: StationId, share: u32, restricted: bool) {
        debug_assert!(share > 0);
        debug_assert!(restricted || !self.has_restricted(), "unrestricted share after a restricted one");
        let cumulative = self.total() + share;
        self.shares.insert(cumulative, via);
        if !restricted {
            self.unrestricted += share;
        }
    }

    pub fn shares(&self) -> &BTreeMap<u32, StationId> {
        &self.shares
    }

    pub fn unrestricted(&self) -> u32 {
        self.unrestricted
    }

    /// Whether any hop lies past the unrestricted prefix.
    pub fn has_restricted(&self) -> bool {
        self.unrestricted < self.total()
    }

    pub fn total(&self) -> u32 {
        self.shares.last_key_value().map_or(0, |(&sum, _)| sum)
    }

    /// The hop chosen by `roll`, which must be below [`total`](Self::total).
    pub fn via_for(&self, roll: u32) -> Option<StationId> {
        self.shares.range((Bound::Excluded(roll), Bound::Unbounded)).next().map(|(_, &via)| via)
    }
}

/// Flows of one cargo at one station, keyed by origin station.
pub type FlowStatMap = BTreeMap<StationId, FlowStat>;

/// One share as persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowRecord {
    pub source: StationId,
    pub via: StationId,
    pub share: u32,
    pub restricted: bool,
}

pub(crate) static FLOW_DESC: LazyLock<Schema<FlowRecord>> = LazyLock::new(|| {
    Schema::new(vec![
        scalar_field(FileType::U16, field!(FlowRecord, source)),
        scalar_field(FileType::U16, field!(FlowRecord, via)),
        scalar_field(FileType::U32, field!(FlowRecord, share)),
        scalar_field(FileType::U8, field!(FlowRecord, restricted)).available(Availability::since(13).legacy(187, 0)),
    ])
});

/// Flatten `flows` into incremental records, sources in ascending order.
pub fn flow_records(flows: &FlowStatMap) -> Vec<FlowRecord> {
    let mut records = Vec::new();
    for (&source, stat) in flows {
        let mut sum = 0;
        for (&cumulative, &via) in &stat.shares {
            let share = cumulative - sum;
            debug_assert!(share > 0, "flow share must be positive");
            records.push(FlowRecord {
                source,
                via,
                share,
                restricted: cumulative > stat.unrestricted,
            });
            sum = cumulative;
        }
    }
    records
}

/// Fold one loaded record into `flows`. A source seen before gets the share
/// appended, wherever its earlier records were. An unrestricted share that
/// follows a restricted one of the same source is corrupt.
pub fn apply_flow_record(flows: &mut FlowStatMap, record: &FlowRecord) -> Result<()> {
    if record.share == 0 {
        return Err(SaveLoadError::corrupt(format!(
            "zero flow share from station {} via {}",
            record.source, record.via
        )));
    }
    match flows.entry(record.source) {
        Entry::Occupied(stat) => {
            let stat = stat.into_mut();
            if !record.restricted && stat.has_restricted() {
                return Err(SaveLoadError::corrupt(format!(
                    "unrestricted flow share from station {} via {} after a restricted one",
                    record.source, record.via
                )));
            }
            stat.append_share(record.via, record.share, record.restricted);
        }
        Entry::Vacant(slot) => {
            slot.insert(FlowStat::new(record.via, record.share, record.restricted));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use railsave_core::FormatVersion;
    use railsave_core::buffer::{LoadBuffer, SaveBuffer};

    fn sample() -> FlowStatMap {
        let mut stat = FlowStat::new(3, 10, false);
        stat.append_share(7, 15, true);
        FlowStatMap::from([(1, stat)])
    }

    #[test]
    fn shares_are_saved_as_increments() {
        let records = flow_records(&sample());
        assert_eq!(
            records,
            vec![
                FlowRecord { source: 1, via: 3, share: 10, restricted: false },
                FlowRecord { source: 1, via: 7, share: 15, restricted: true },
            ]
        );
    }

    #[test]
    fn increments_accumulate_on_load() {
        let mut flows = FlowStatMap::new();
        for record in flow_records(&sample()) {
            apply_flow_record(&mut flows, &record).unwrap();
        }
        assert_eq!(flows, sample());
        let stat = &flows[&1];
        assert_eq!(stat.shares().keys().copied().collect::<Vec<_>>(), vec![10, 25]);
        assert_eq!(stat.unrestricted(), 10);
        assert_eq!(stat.via_for(9), Some(3));
        assert_eq!(stat.via_for(10), Some(7));
        assert_eq!(stat.via_for(25), None);
    }

    #[test]
    fn repeated_source_appends() {
        let mut flows = FlowStatMap::new();
        let rec = |source, via, share| FlowRecord { source, via, share, restricted: false };
        apply_flow_record(&mut flows, &rec(1, 2, 5)).unwrap();
        apply_flow_record(&mut flows, &rec(4, 2, 5)).unwrap();
        apply_flow_record(&mut flows, &rec(1, 3, 5)).unwrap();
        assert_eq!(flows[&1].total(), 10);
        assert_eq!(flows[&4].total(), 5);
    }

    #[test]
    fn restricted_first_is_corrupt() {
        let rec = |via, share, restricted| FlowRecord { source: 1, via, share, restricted };
        let mut flows = FlowStatMap::new();
        apply_flow_record(&mut flows, &rec(3, 3, true)).unwrap();
        let err = apply_flow_record(&mut flows, &rec(4, 1, false)).unwrap_err();
        assert!(err.is_corrupt());
        assert_eq!(flows[&1].total(), 3);
        assert_eq!(flows[&1].unrestricted(), 0);

        // Another source is unaffected.
        apply_flow_record(&mut flows, &FlowRecord { source: 2, ..rec(4, 1, false) }).unwrap();
    }

    #[test]
    fn ordered_shares_survive_reload() {
        let mut stat = FlowStat::new(3, 3, false);
        stat.append_share(4, 1, false);
        stat.append_share(5, 2, true);
        stat.append_share(6, 4, true);
        let flows = FlowStatMap::from([(9, stat)]);

        let records = flow_records(&flows);
        let flags: Vec<_> = records.iter().map(|r| r.restricted).collect();
        assert_eq!(flags, vec![false, false, true, true]);

        let mut back = FlowStatMap::new();
        for record in &records {
            apply_flow_record(&mut back, record).unwrap();
        }
        assert_eq!(back, flows);
        assert_eq!(flow_records(&back), records);
    }

    #[test]
    fn zero_share_is_corrupt() {
        let mut flows = FlowStatMap::new();
        let err = apply_flow_record(&mut flows, &FlowRecord::default()).unwrap_err();
        assert!(err.is_corrupt());
        assert!(flows.is_empty());
    }

    #[test]
    fn restricted_flag_is_versioned() {
        let record = FlowRecord { source: 1, via: 2, share: 3, restricted: true };
        for (fv, len) in [
            (FormatVersion::CURRENT, 9),
            (FormatVersion::Current { version: 12 }, 8),
            (FormatVersion::Legacy { major: 186, minor: 0 }, 8),
            (FormatVersion::Legacy { major: 187, minor: 0 }, 9),
        ] {
            let mut out = SaveBuffer::with_version(fv);
            FLOW_DESC.write(&record, &(), &mut out);
            assert_eq!(out.len(), len, "{fv}");
            let mut back = FlowRecord::default();
            FLOW_DESC
                .read(&mut back, &mut (), &mut LoadBuffer::new(out.as_bytes(), fv))
                .unwrap();
            assert_eq!(back.restricted, len == 9);
        }
    }
}
