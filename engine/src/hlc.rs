//! Hybrid logical clock for causal ordering of operations.
//!
//! The clock provides a total ordering across all nodes, which is essential
//! for deterministic conflict resolution. Every local write and every
//! observed remote timestamp advances the clock, so two nodes that have seen
//! the same operations agree on their order.

use crate::error::{Error, Result};
use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// A hybrid logical clock timestamp.
///
/// Ordering rules:
/// 1. Higher wall time wins
/// 2. If wall times are equal, higher counter wins
/// 3. If counters are equal, lexicographically higher node_id wins
///
/// This ensures a total order across all operations from all nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HlcTimestamp {
    /// Physical-time component, milliseconds since the Unix epoch
    pub wall: u64,
    /// Tie-breaking counter for events within the same millisecond
    pub counter: u32,
    /// Final tie-breaker between nodes
    pub node_id: NodeId,
}

impl HlcTimestamp {
    /// Create a timestamp from its parts.
    pub fn new(wall: u64, counter: u32, node_id: impl Into<NodeId>) -> Self {
        Self {
            wall,
            counter,
            node_id: node_id.into(),
        }
    }

    /// The zero timestamp, smaller than every stamp a clock can mint.
    /// Used as the `since` cursor for a full oplog scan and as the
    /// latest-timestamp of an empty store.
    pub fn zero() -> Self {
        Self {
            wall: 0,
            counter: 0,
            node_id: NodeId::new(),
        }
    }

    /// Check whether this is the zero timestamp.
    pub fn is_zero(&self) -> bool {
        self.wall == 0 && self.counter == 0 && self.node_id.is_empty()
    }
}

impl Ord for HlcTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall
            .cmp(&other.wall)
            .then(self.counter.cmp(&other.counter))
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for HlcTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.wall, self.counter, self.node_id)
    }
}

impl FromStr for HlcTimestamp {
    type Err = Error;

    /// Parse the textual `wall-counter-nodeId` form. The node id may itself
    /// contain hyphens; it is everything after the second one.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '-');
        let wall = parts
            .next()
            .ok_or_else(|| Error::InvalidTimestamp(s.to_string()))?;
        let counter = parts
            .next()
            .ok_or_else(|| Error::InvalidTimestamp(s.to_string()))?;
        let node_id = parts.next().unwrap_or("");

        let wall = wall
            .parse::<u64>()
            .map_err(|_| Error::InvalidTimestamp(s.to_string()))?;
        let counter = counter
            .parse::<u32>()
            .map_err(|_| Error::InvalidTimestamp(s.to_string()))?;

        Ok(Self::new(wall, counter, node_id))
    }
}

/// Wallclock source, injectable so tests can freeze or rewind time.
pub type WallClockFn = fn() -> u64;

fn system_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The per-node hybrid logical clock.
///
/// `now` and `update` are read-modify-write operations on the shared
/// `(wall, counter)` state and are guarded by a mutex, so the clock can be
/// shared across connection tasks, the orchestrator and the gossip queue.
#[derive(Debug)]
pub struct HlcClock {
    node_id: NodeId,
    state: Mutex<(u64, u32)>,
    wallclock: WallClockFn,
}

impl HlcClock {
    /// Create a clock for a node, backed by the system wallclock.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self::with_wallclock(node_id, system_millis)
    }

    /// Create a clock with a custom wallclock source.
    pub fn with_wallclock(node_id: impl Into<NodeId>, wallclock: WallClockFn) -> Self {
        Self {
            node_id: node_id.into(),
            state: Mutex::new((0, 0)),
            wallclock,
        }
    }

    /// The node id stamped onto every timestamp this clock mints.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Mint a timestamp for a local event.
    ///
    /// Strictly increasing even when the wallclock is frozen or moves
    /// backward: a stale physical reading bumps the counter instead.
    pub fn now(&self) -> HlcTimestamp {
        let mut state = self.state.lock().unwrap();
        let pt = (self.wallclock)();
        if pt > state.0 {
            *state = (pt, 0);
        } else {
            state.1 += 1;
        }
        HlcTimestamp::new(state.0, state.1, self.node_id.clone())
    }

    /// Advance the clock past an observed remote timestamp and return the
    /// new local stamp. The counter cases guarantee that two nodes can never
    /// mint the same `(wall, counter)` pair for causally related events.
    pub fn update(&self, remote: &HlcTimestamp) -> HlcTimestamp {
        let mut state = self.state.lock().unwrap();
        let pt = (self.wallclock)();
        let (wall, counter) = *state;
        let max_wall = pt.max(wall).max(remote.wall);

        let new_counter = if max_wall == pt && pt == wall && wall == remote.wall {
            counter.max(remote.counter) + 1
        } else if max_wall == pt && pt == wall {
            counter + 1
        } else if max_wall == pt && pt == remote.wall {
            remote.counter + 1
        } else if max_wall == wall {
            counter + 1
        } else if max_wall == remote.wall {
            remote.counter + 1
        } else {
            0
        };

        *state = (max_wall, new_counter);
        HlcTimestamp::new(max_wall, new_counter, self.node_id.clone())
    }

    /// The last stamp this clock handed out, without advancing it.
    pub fn last(&self) -> HlcTimestamp {
        let state = self.state.lock().unwrap();
        HlcTimestamp::new(state.0, state.1, self.node_id.clone())
    }
}
