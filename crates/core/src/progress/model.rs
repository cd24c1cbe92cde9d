//! Progress records, cache entries and their sync state.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::encoding::{int_string, opt_int_string, vec_int_string};
use crate::errors::{Result, StoreError};

/// Sequence number of a location on the trail, `1..=total`.
pub type LocationSeq = u64;

/// Number of stage flags derived from the completion count.
pub const STAGE_COUNT: usize = 3;

/// Opaque caller identity issued by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(StoreError::unauthorized("Identity must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stage flags derived from the number of completed locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageFlags {
    #[serde(rename = "1")]
    pub stage1: bool,
    #[serde(rename = "2")]
    pub stage2: bool,
    #[serde(rename = "3")]
    pub stage3: bool,
}

impl StageFlags {
    fn from_count(count: usize) -> Self {
        Self {
            stage1: count >= 1,
            stage2: count >= 2,
            stage3: count >= 3,
        }
    }

    pub fn as_array(&self) -> [bool; STAGE_COUNT] {
        [self.stage1, self.stage2, self.stage3]
    }
}

/// Completion state for one identity.
///
/// Stage flags are never stored: [`ProgressRecord::stage_flags`] derives them
/// from the completed set, and decoding ignores whatever flags were persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProgressRecordRepr", into = "ProgressRecordRepr")]
pub struct ProgressRecord {
    completed: Vec<LocationSeq>,
    last_completed: Option<LocationSeq>,
    total_locations: u64,
}

impl ProgressRecord {
    pub fn empty(total_locations: u64) -> Self {
        Self {
            completed: Vec::new(),
            last_completed: None,
            total_locations,
        }
    }

    /// Rebuild a record from stored parts, rejecting duplicates and out-of-range entries.
    pub fn from_parts(
        completed: Vec<LocationSeq>,
        last_completed: Option<LocationSeq>,
        total_locations: u64,
    ) -> Result<Self> {
        let mut seen = HashSet::with_capacity(completed.len());
        for location in &completed {
            validate_location(*location, total_locations)?;
            if !seen.insert(*location) {
                return Err(StoreError::protocol(format!(
                    "location {} appears twice in completed set",
                    location
                )));
            }
        }
        if let Some(last) = last_completed {
            if !seen.contains(&last) {
                return Err(StoreError::protocol(format!(
                    "last completed location {} is not in the completed set",
                    last
                )));
            }
        }
        Ok(Self {
            completed,
            last_completed,
            total_locations,
        })
    }

    /// Completed locations in insertion order.
    pub fn completed(&self) -> &[LocationSeq] {
        &self.completed
    }

    pub fn last_completed(&self) -> Option<LocationSeq> {
        self.last_completed
    }

    pub fn total_locations(&self) -> u64 {
        self.total_locations
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn contains(&self, location: LocationSeq) -> bool {
        self.completed.contains(&location)
    }

    pub fn stage_flags(&self) -> StageFlags {
        StageFlags::from_count(self.completed.len())
    }

    pub fn is_complete(&self) -> bool {
        self.total_locations > 0 && self.completed.len() as u64 >= self.total_locations
    }

    /// Same set membership, ignoring insertion order.
    pub fn same_locations(&self, other: &ProgressRecord) -> bool {
        self.completed.len() == other.completed.len()
            && self.completed.iter().all(|loc| other.contains(*loc))
    }

    /// Record with `location` added. Already-completed locations return an
    /// unchanged copy; out-of-range locations are rejected.
    pub fn with_completion(&self, location: LocationSeq) -> Result<Self> {
        validate_location(location, self.total_locations)?;
        if self.contains(location) {
            return Ok(self.clone());
        }
        let mut next = self.clone();
        next.completed.push(location);
        next.last_completed = Some(location);
        Ok(next)
    }

    /// Union with `other`, keeping this record's order first. Completions are
    /// monotonic, so nothing in either side is dropped.
    pub fn union(&self, other: &ProgressRecord) -> Self {
        let mut merged = self.clone();
        merged.total_locations = self.total_locations.max(other.total_locations);
        for location in &other.completed {
            if !merged.contains(*location) {
                merged.completed.push(*location);
                merged.last_completed = Some(*location);
            }
        }
        merged
    }

    /// Locations present here but missing from `other`, in insertion order.
    pub fn missing_from(&self, other: &ProgressRecord) -> Vec<LocationSeq> {
        self.completed
            .iter()
            .copied()
            .filter(|loc| !other.contains(*loc))
            .collect()
    }

    /// Record with `location` removed. Only used to undo a rejected optimistic
    /// write in the local cache; the authoritative set never shrinks.
    pub fn without_location(&self, location: LocationSeq) -> Self {
        let completed: Vec<LocationSeq> = self
            .completed
            .iter()
            .copied()
            .filter(|loc| *loc != location)
            .collect();
        let last_completed = match self.last_completed {
            Some(last) if last == location => completed.last().copied(),
            other => other,
        };
        Self {
            completed,
            last_completed,
            total_locations: self.total_locations,
        }
    }
}

fn validate_location(location: LocationSeq, total: u64) -> Result<()> {
    if location == 0 || location > total {
        return Err(StoreError::InvalidLocation { location, total });
    }
    Ok(())
}

/// Wire and storage shape of a [`ProgressRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressRecordRepr {
    #[serde(with = "vec_int_string")]
    completed_locations: Vec<LocationSeq>,
    #[serde(with = "opt_int_string", default)]
    last_completed_location: Option<LocationSeq>,
    #[serde(with = "int_string")]
    total_locations: u64,
    #[serde(default)]
    stage_flags: StageFlags,
}

impl From<ProgressRecord> for ProgressRecordRepr {
    fn from(record: ProgressRecord) -> Self {
        let stage_flags = record.stage_flags();
        Self {
            completed_locations: record.completed,
            last_completed_location: record.last_completed,
            total_locations: record.total_locations,
            stage_flags,
        }
    }
}

impl TryFrom<ProgressRecordRepr> for ProgressRecord {
    type Error = StoreError;

    fn try_from(repr: ProgressRecordRepr) -> Result<Self> {
        let record = ProgressRecord::from_parts(
            repr.completed_locations,
            repr.last_completed_location,
            repr.total_locations,
        )?;
        if record.stage_flags() != repr.stage_flags {
            log::debug!(
                "Ignoring persisted stage flags {:?}; derived {:?}",
                repr.stage_flags,
                record.stage_flags()
            );
        }
        Ok(record)
    }
}

/// Sync state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntrySyncState {
    /// Local intent written; a server write is in flight.
    Optimistic,
    /// Verified copy of the last known authoritative record.
    Confirmed,
    /// Queued for reconciliation.
    Unsynced {
        #[serde(with = "int_string")]
        attempts: u32,
    },
}

impl EntrySyncState {
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

/// Client-side mirror of a [`ProgressRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CacheEntryRepr", into = "CacheEntryRepr")]
pub struct CacheEntry {
    pub record: ProgressRecord,
    pub state: EntrySyncState,
    /// Unix millis of the last write to this entry.
    pub updated_at: i64,
}

impl CacheEntry {
    pub fn new(record: ProgressRecord, state: EntrySyncState) -> Self {
        Self {
            record,
            state,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn confirmed(record: ProgressRecord) -> Self {
        Self::new(record, EntrySyncState::Confirmed)
    }

    pub fn is_synced(&self) -> bool {
        self.state.is_synced()
    }

    /// Copy of this entry with a new state and a fresh timestamp.
    pub fn with_state(&self, state: EntrySyncState) -> Self {
        Self::new(self.record.clone(), state)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntryRepr {
    #[serde(flatten)]
    record: ProgressRecordRepr,
    synced: bool,
    state: EntrySyncState,
    #[serde(with = "int_string")]
    updated_at: i64,
}

impl From<CacheEntry> for CacheEntryRepr {
    fn from(entry: CacheEntry) -> Self {
        Self {
            synced: entry.state.is_synced(),
            record: entry.record.into(),
            state: entry.state,
            updated_at: entry.updated_at,
        }
    }
}

impl TryFrom<CacheEntryRepr> for CacheEntry {
    type Error = StoreError;

    fn try_from(repr: CacheEntryRepr) -> Result<Self> {
        Ok(Self {
            record: ProgressRecord::try_from(repr.record)?,
            state: repr.state,
            updated_at: repr.updated_at,
        })
    }
}

/// Per-attempt phase reported while a completion is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPhase {
    Pending,
    Optimistic,
    Confirmed,
    Queued,
    RolledBack,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(locations: &[LocationSeq], total: u64) -> ProgressRecord {
        locations
            .iter()
            .try_fold(ProgressRecord::empty(total), |acc, loc| {
                acc.with_completion(*loc)
            })
            .expect("valid locations")
    }

    #[test]
    fn stage_flags_track_completed_count() {
        let mut current = ProgressRecord::empty(5);
        assert_eq!(current.stage_flags().as_array(), [false, false, false]);
        for (idx, loc) in [4, 2, 5, 1].into_iter().enumerate() {
            current = current.with_completion(loc).expect("in range");
            let count = idx + 1;
            assert_eq!(
                current.stage_flags().as_array(),
                [count >= 1, count >= 2, count >= 3]
            );
        }
    }

    #[test]
    fn completion_is_idempotent() {
        let once = record(&[2], 3);
        let twice = once.with_completion(2).expect("in range");
        assert_eq!(once, twice);
        assert_eq!(twice.completed(), &[2]);
        assert_eq!(twice.last_completed(), Some(2));
    }

    #[test]
    fn out_of_range_locations_are_rejected() {
        let base = record(&[1], 3);
        for bad in [0, 4] {
            let err = base.with_completion(bad).expect_err("out of range");
            assert_eq!(
                err,
                StoreError::InvalidLocation {
                    location: bad,
                    total: 3
                }
            );
        }
    }

    #[test]
    fn union_keeps_server_order_and_adds_local_intent() {
        let server = record(&[3, 1], 3);
        let local = record(&[1, 2], 3);
        let merged = server.union(&local);
        assert_eq!(merged.completed(), &[3, 1, 2]);
        assert_eq!(merged.last_completed(), Some(2));
        assert_eq!(local.missing_from(&server), vec![2]);
    }

    #[test]
    fn without_location_restores_previous_last() {
        let rec = record(&[1, 3], 3);
        let rolled = rec.without_location(3);
        assert_eq!(rolled.completed(), &[1]);
        assert_eq!(rolled.last_completed(), Some(1));
        assert_eq!(rolled.without_location(1).last_completed(), None);
    }

    #[test]
    fn persisted_flags_are_recomputed_on_decode() {
        let json = r#"{
            "completedLocations": ["1"],
            "lastCompletedLocation": "1",
            "totalLocations": "3",
            "stageFlags": {"1": true, "2": true, "3": true}
        }"#;
        let decoded: ProgressRecord = serde_json::from_str(json).expect("decode");
        assert_eq!(decoded.stage_flags().as_array(), [true, false, false]);
    }

    #[test]
    fn duplicate_locations_fail_decoding() {
        let json = r#"{"completedLocations":["1","1"],"lastCompletedLocation":"1","totalLocations":"3"}"#;
        assert!(serde_json::from_str::<ProgressRecord>(json).is_err());
    }

    #[test]
    fn cache_entry_layout_uses_text_integers() {
        let entry = CacheEntry {
            record: record(&[1, 2], 3),
            state: EntrySyncState::Unsynced { attempts: 3 },
            updated_at: 1_760_000_000_000,
        };
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["completedLocations"], serde_json::json!(["1", "2"]));
        assert_eq!(value["totalLocations"], "3");
        assert_eq!(value["synced"], false);
        assert_eq!(value["state"]["status"], "unsynced");
        assert_eq!(value["state"]["attempts"], "3");
        assert_eq!(value["updatedAt"], "1760000000000");
        assert_eq!(value["stageFlags"]["2"], true);

        let back: CacheEntry = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, entry);
    }
}
