use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one consumer group's view of one partitioned event stream.
///
/// Every ownership record, checkpoint, and callback context is scoped to this
/// triple; two processors with different identities never interact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamIdentity {
    pub namespace: String,
    pub stream_name: String,
    pub consumer_group: String,
}

/// A claim record asserting which consumer-group member currently reads a
/// given partition.
///
/// An empty `owner_id` marks the record as released. The `etag` is an opaque
/// version token used for optimistic-concurrency writes; it is absent for a
/// record that does not exist in the store yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionOwnership {
    pub namespace: String,
    pub stream_name: String,
    pub consumer_group: String,
    pub partition_id: String,
    pub owner_id: String,
    pub last_modified_time: DateTime<Utc>,
    pub etag: Option<String>,
}

impl PartitionOwnership {
    /// Whether this record counts as actively owned at `now`.
    ///
    /// A record with an empty owner, or one whose last modification is older
    /// than `expiration`, is treated as unowned by every instance even though
    /// it physically remains in the store until overwritten.
    pub fn is_active(&self, now: DateTime<Utc>, expiration: Duration) -> bool {
        if self.owner_id.is_empty() {
            return false;
        }
        let age = now.signed_duration_since(self.last_modified_time);
        match chrono::Duration::from_std(expiration) {
            Ok(expiration) => age < expiration,
            Err(_) => true,
        }
    }

    pub fn identity(&self) -> StreamIdentity {
        StreamIdentity {
            namespace: self.namespace.clone(),
            stream_name: self.stream_name.clone(),
            consumer_group: self.consumer_group.clone(),
        }
    }
}

/// The last durably-recorded read position for a partition within a consumer
/// group. Written only through the explicit update-checkpoint call made by
/// user code during event processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub namespace: String,
    pub stream_name: String,
    pub consumer_group: String,
    pub partition_id: String,
    pub offset: Option<i64>,
    pub sequence_number: Option<i64>,
}

/// Where to begin reading a partition.
///
/// `Offset` and `SequenceNumber` are exclusive: reading resumes with the
/// first event *after* the given position, matching checkpoint semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartPosition {
    Earliest,
    Latest,
    Offset(i64),
    SequenceNumber(i64),
}

/// Properties of the most recently enqueued event on a partition, observed
/// by the stream client when tracking is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastEnqueuedEventProperties {
    pub sequence_number: i64,
    pub offset: i64,
    pub enqueued_time: DateTime<Utc>,
    pub retrieved_time: DateTime<Utc>,
}

/// A single event read from a partition.
#[derive(Debug, Clone)]
pub struct Event {
    pub body: Bytes,
    pub offset: i64,
    pub sequence_number: i64,
    pub enqueued_time: DateTime<Utc>,
    pub partition_key: Option<String>,
    /// Populated only when `track_last_enqueued_event_properties` is set.
    pub last_enqueued: Option<LastEnqueuedEventProperties>,
}

impl Event {
    pub fn new(body: impl Into<Bytes>, offset: i64, sequence_number: i64) -> Self {
        Self {
            body: body.into(),
            offset,
            sequence_number,
            enqueued_time: Utc::now(),
            partition_key: None,
            last_enqueued: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ownership(owner_id: &str, age: Duration) -> PartitionOwnership {
        PartitionOwnership {
            namespace: "ns".to_string(),
            stream_name: "stream".to_string(),
            consumer_group: "cg".to_string(),
            partition_id: "0".to_string(),
            owner_id: owner_id.to_string(),
            last_modified_time: Utc::now() - chrono::Duration::from_std(age).unwrap(),
            etag: Some("1".to_string()),
        }
    }

    #[test]
    fn fresh_ownership_is_active() {
        let o = ownership("owner-1", Duration::from_secs(1));
        assert!(o.is_active(Utc::now(), Duration::from_secs(30)));
    }

    #[test]
    fn aged_out_ownership_is_inactive() {
        let o = ownership("owner-1", Duration::from_secs(60));
        assert!(!o.is_active(Utc::now(), Duration::from_secs(30)));
    }

    #[test]
    fn released_ownership_is_inactive() {
        let o = ownership("", Duration::from_secs(0));
        assert!(!o.is_active(Utc::now(), Duration::from_secs(30)));
    }
}
