//! Identity and ordering types for the outbox.

use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A unique identifier for a queued operation.
///
/// UUID v4, assigned by the store at enqueue time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(uuid::Uuid);

impl OperationId {
    /// Create a new random OperationId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({})", self.0)
    }
}

impl FromStr for OperationId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ParseError::InvalidId(s.to_string()))
    }
}

/// A unique identifier for a surfaced sync error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncErrorId(uuid::Uuid);

impl SyncErrorId {
    /// Create a new random SyncErrorId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SyncErrorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SyncErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncErrorId({})", self.0)
    }
}

impl FromStr for SyncErrorId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ParseError::InvalidId(s.to_string()))
    }
}

/// The record an operation targets: a kind (e.g. `profile`, `log_entry`)
/// plus the record's id within that kind.
///
/// Operations sharing an `EntityRef` form one lane and are applied in
/// enqueue order.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Record kind.
    pub kind: String,
    /// Record id within the kind.
    pub id: String,
}

impl EntityRef {
    /// Create a new entity reference.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityRef({}/{})", self.kind, self.id)
    }
}

/// Wall-clock instant in milliseconds since the Unix epoch.
///
/// Used for `created_at`, attempt times and the remote's per-field
/// modification times compared during conflict resolution.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from milliseconds since the epoch.
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    /// Milliseconds since the epoch.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// This timestamp shifted forward by `delay` (saturating).
    pub fn plus(&self, delay: Duration) -> Self {
        Self(self.0.saturating_add(delay.as_millis() as u64))
    }

    /// Time remaining from `now` until this timestamp, zero if already past.
    pub fn duration_since(&self, now: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(now.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_id_is_uuid_v4() {
        let id = OperationId::new();
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn operation_id_parses_its_display() {
        let id = OperationId::new();
        let parsed: OperationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn operation_id_rejects_garbage() {
        let result = "not-a-uuid".parse::<OperationId>();
        assert!(matches!(result, Err(ParseError::InvalidId(_))));
    }

    #[test]
    fn operation_ids_are_unique() {
        assert_ne!(OperationId::new(), OperationId::new());
    }

    #[test]
    fn entity_ref_display() {
        let entity = EntityRef::new("profile", "x");
        assert_eq!(entity.to_string(), "profile/x");
    }

    #[test]
    fn entity_refs_with_same_id_but_different_kind_differ() {
        assert_ne!(EntityRef::new("profile", "1"), EntityRef::new("log", "1"));
    }

    #[test]
    fn timestamp_ordering() {
        let t1 = Timestamp::from_millis(100);
        let t2 = Timestamp::from_millis(200);
        assert!(t1 < t2);
    }

    #[test]
    fn timestamp_plus_and_duration_since() {
        let t = Timestamp::from_millis(1_000);
        let later = t.plus(Duration::from_millis(250));
        assert_eq!(later.as_millis(), 1_250);
        assert_eq!(later.duration_since(t), Duration::from_millis(250));
        assert_eq!(t.duration_since(later), Duration::ZERO);
    }

    #[test]
    fn timestamp_plus_saturates() {
        let t = Timestamp::from_millis(u64::MAX);
        assert_eq!(t.plus(Duration::from_secs(1)).as_millis(), u64::MAX);
    }

    #[test]
    fn timestamp_now_is_after_epoch() {
        assert!(Timestamp::now().as_millis() > 0);
    }
}
