use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU8, Ordering},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;
use tokio::time::Instant;

/// Lifecycle of a single container. A container only ever moves forward:
/// `Starting -> Idle -> (Busy <-> Idle)* -> Reclaiming -> Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Starting,
    Idle,
    Busy,
    Reclaiming,
    Destroyed,
}

/// A container tracked by a pool. The id and endpoint come from the runtime
/// driver; `function_id` is fixed at launch.
#[derive(Debug, Clone)]
pub struct Container {
    pub id: String,
    pub function_id: String,
    pub endpoint: String,
    pub state: ContainerState,
    /// Last `Busy -> Idle` transition. Set at launch completion for a
    /// container that has never served a request.
    pub last_used_at: Instant,
}

impl Container {
    pub fn launched(id: String, function_id: String, endpoint: String) -> Self {
        Self {
            id,
            function_id,
            endpoint,
            state: ContainerState::Starting,
            last_used_at: Instant::now(),
        }
    }
}

/// How an acquired container came to be available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartKind {
    /// Served by an already-running idle container or a direct handoff.
    Warm,
    /// Served by a container launched for this request.
    Cold,
}

/// What the invocation controller observed when giving a container back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The container answered; it is healthy and reusable.
    Completed,
    /// Transport-level failure talking to the container; presume it dead.
    ContainerFailed,
}

#[derive(Debug, Error)]
#[error("unknown reuse strategy: {0}")]
pub struct UnknownStrategy(pub String);

/// Reuse policy for picking an idle container. Both operate on the idle
/// list ordered by ascending `last_used_at`: LRU takes the head, MRU the
/// tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Lru,
    Mru,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Lru => "lru",
            Strategy::Mru => "mru",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "lcs" (least recently created/used selection) is the historical
        // name for the oldest-idle-first policy.
        match s.to_ascii_lowercase().as_str() {
            "lru" | "lcs" => Ok(Strategy::Lru),
            "mru" => Ok(Strategy::Mru),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

impl Serialize for Strategy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Strategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Single-word atomic cell holding the active strategy. Read on every
/// acquire; swapped at runtime without any pool-level locking.
pub struct StrategyCell(AtomicU8);

impl StrategyCell {
    pub fn new(strategy: Strategy) -> Self {
        Self(AtomicU8::new(strategy as u8))
    }

    pub fn load(&self) -> Strategy {
        match self.0.load(Ordering::Relaxed) {
            0 => Strategy::Lru,
            _ => Strategy::Mru,
        }
    }

    pub fn store(&self, strategy: Strategy) {
        self.0.store(strategy as u8, Ordering::Relaxed);
    }
}
