//! Lane planning.
//!
//! A lane is the ordered sub-sequence of queued operations sharing an
//! entity. Lanes execute independently; within a lane only the head may run,
//! so update N+1 never lands on a record that never received update N.

use std::collections::HashMap;
use std::time::Duration;
use sync_types::{EntityRef, OperationId, OperationStatus, SyncOperation, Timestamp};

/// What a lane can do right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneState {
    /// Nothing queued.
    Empty,
    /// The head can start an attempt now.
    Ready,
    /// The head is backing off.
    Waiting {
        /// Remaining backoff.
        remaining: Duration,
    },
    /// The head is `InFlight`: being executed, or orphaned by a failed attempt.
    Busy,
    /// The head failed terminally; the lane waits for a retry or dismissal.
    Blocked {
        /// The blocking operation.
        by: OperationId,
    },
}

/// The queued operations of one entity, in creation order.
#[derive(Debug, Clone, PartialEq)]
pub struct Lane {
    /// Shared target.
    pub entity: EntityRef,
    /// Operations, oldest first.
    pub operations: Vec<SyncOperation>,
}

impl Lane {
    /// The operation that must go next.
    pub fn head(&self) -> Option<&SyncOperation> {
        self.operations.first()
    }

    /// Evaluate the lane at `now`.
    pub fn state(&self, now: Timestamp) -> LaneState {
        lane_state(self.head(), now)
    }
}

/// Evaluate a lane from its head operation.
pub fn lane_state(head: Option<&SyncOperation>, now: Timestamp) -> LaneState {
    let Some(head) = head else {
        return LaneState::Empty;
    };
    match head.status {
        OperationStatus::InFlight => LaneState::Busy,
        OperationStatus::FailedTerminal => LaneState::Blocked { by: head.id },
        OperationStatus::FailedRetryable => match head.next_attempt_at {
            Some(at) if at > now => LaneState::Waiting {
                remaining: at.duration_since(now),
            },
            _ => LaneState::Ready,
        },
        // Succeeded operations are purged; treat a stale copy as done
        OperationStatus::Pending | OperationStatus::Succeeded => LaneState::Ready,
    }
}

/// Group operations into lanes.
///
/// `operations` must be in creation order. Lanes are returned in the order
/// of their oldest operation, and each lane keeps creation order.
pub fn plan_lanes(operations: Vec<SyncOperation>) -> Vec<Lane> {
    let mut index: HashMap<EntityRef, usize> = HashMap::new();
    let mut lanes: Vec<Lane> = Vec::new();

    for op in operations {
        match index.get(&op.entity) {
            Some(&i) => lanes[i].operations.push(op),
            None => {
                index.insert(op.entity.clone(), lanes.len());
                lanes.push(Lane {
                    entity: op.entity.clone(),
                    operations: vec![op],
                });
            }
        }
    }

    lanes
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::NewOperation;

    fn op(entity: &str, seq: u64) -> SyncOperation {
        SyncOperation::from_new(
            NewOperation::delete(EntityRef::new("profile", entity)),
            OperationId::new(),
            Timestamp::from_millis(seq),
            seq,
        )
    }

    #[test]
    fn groups_by_entity_preserving_order() {
        let ops = vec![op("x", 1), op("y", 2), op("x", 3), op("z", 4), op("y", 5)];
        let ids: Vec<_> = ops.iter().map(|o| o.id).collect();

        let lanes = plan_lanes(ops);

        assert_eq!(lanes.len(), 3);
        assert_eq!(lanes[0].entity, EntityRef::new("profile", "x"));
        assert_eq!(
            lanes[0].operations.iter().map(|o| o.id).collect::<Vec<_>>(),
            vec![ids[0], ids[2]]
        );
        assert_eq!(
            lanes[1].operations.iter().map(|o| o.id).collect::<Vec<_>>(),
            vec![ids[1], ids[4]]
        );
        assert_eq!(lanes[2].operations.len(), 1);
    }

    #[test]
    fn empty_input_has_no_lanes() {
        assert!(plan_lanes(vec![]).is_empty());
        assert_eq!(lane_state(None, Timestamp::from_millis(0)), LaneState::Empty);
    }

    #[test]
    fn pending_head_is_ready() {
        let lanes = plan_lanes(vec![op("x", 1)]);
        assert_eq!(lanes[0].state(Timestamp::from_millis(5)), LaneState::Ready);
    }

    #[test]
    fn terminal_head_blocks_lane() {
        let mut head = op("x", 1);
        head.status = OperationStatus::FailedTerminal;
        let head_id = head.id;
        let lanes = plan_lanes(vec![head, op("x", 2)]);

        assert_eq!(
            lanes[0].state(Timestamp::from_millis(5)),
            LaneState::Blocked { by: head_id }
        );
    }

    #[test]
    fn retryable_head_waits_for_backoff() {
        let mut head = op("x", 1);
        head.status = OperationStatus::FailedRetryable;
        head.next_attempt_at = Some(Timestamp::from_millis(1_000));
        let lane = Lane {
            entity: head.entity.clone(),
            operations: vec![head],
        };

        assert_eq!(
            lane.state(Timestamp::from_millis(400)),
            LaneState::Waiting {
                remaining: Duration::from_millis(600)
            }
        );
        assert_eq!(lane.state(Timestamp::from_millis(1_000)), LaneState::Ready);
    }

    #[test]
    fn in_flight_head_is_busy() {
        let mut head = op("x", 1);
        head.status = OperationStatus::InFlight;
        assert_eq!(
            lane_state(Some(&head), Timestamp::from_millis(0)),
            LaneState::Busy
        );
    }
}
