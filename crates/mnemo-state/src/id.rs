//! Time-ordered 64-bit record identifiers
//!
//! Layout (most significant bit first):
//!
//! ```text
//! [ 0 | 41 bits: ms since 2024-01-01 | 10 bits: worker | 12 bits: sequence ]
//! ```
//!
//! Ids from one generator are strictly increasing. Two generators with
//! different worker tags never collide. No coordination between processes
//! is required.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 2024-01-01T00:00:00Z in Unix milliseconds.
pub const ID_EPOCH_MS: u64 = 1_704_067_200_000;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

/// Largest worker tag (exclusive upper bound is `MAX_WORKER_ID + 1`).
pub const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

/// Identifier of a stored record. Assigned at insert time, never chosen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(RecordId)
    }
}

/// Parts of an identifier, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    /// Unix milliseconds
    pub timestamp_ms: u64,
    pub worker: u16,
    pub sequence: u16,
}

/// Lock-free snowflake-style generator.
///
/// `state` packs `(last_ms << SEQUENCE_BITS) | sequence` so that a single
/// compare-and-swap advances both.
#[derive(Debug)]
pub struct IdGenerator {
    worker: u16,
    state: AtomicU64,
}

impl IdGenerator {
    /// Create a generator with a fixed worker tag. Tags above
    /// [`MAX_WORKER_ID`] are masked into range.
    pub fn new(worker: u16) -> Self {
        Self {
            worker: worker & MAX_WORKER_ID,
            state: AtomicU64::new(0),
        }
    }

    /// Create a generator with a worker tag drawn from a random UUID.
    pub fn with_random_worker() -> Self {
        let bits = uuid::Uuid::new_v4().as_u128();
        Self::new((bits as u16) & MAX_WORKER_ID)
    }

    pub fn worker(&self) -> u16 {
        self.worker
    }

    /// Produce the next identifier.
    ///
    /// Spins until the next millisecond when the sequence for the current
    /// one is exhausted. A clock that moves backwards keeps using the last
    /// observed millisecond.
    pub fn next_id(&self) -> RecordId {
        loop {
            let now = current_ms();
            let prev = self.state.load(Ordering::Acquire);
            let prev_ms = prev >> SEQUENCE_BITS;
            let prev_seq = prev & MAX_SEQUENCE;

            let (ms, seq) = if now > prev_ms {
                (now, 0)
            } else if prev_seq < MAX_SEQUENCE {
                (prev_ms, prev_seq + 1)
            } else {
                std::thread::yield_now();
                continue;
            };

            let next = (ms << SEQUENCE_BITS) | seq;
            if self
                .state
                .compare_exchange(prev, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return RecordId(
                    (ms << (WORKER_BITS + SEQUENCE_BITS))
                        | ((self.worker as u64) << SEQUENCE_BITS)
                        | seq,
                );
            }
        }
    }

    /// Produce `n` identifiers in increasing order.
    pub fn next_ids(&self, n: usize) -> Vec<RecordId> {
        (0..n).map(|_| self.next_id()).collect()
    }

    /// Split an identifier into timestamp, worker and sequence.
    pub fn decompose(id: RecordId) -> IdParts {
        let raw = id.0;
        IdParts {
            timestamp_ms: (raw >> (WORKER_BITS + SEQUENCE_BITS)) + ID_EPOCH_MS,
            worker: ((raw >> SEQUENCE_BITS) & MAX_WORKER_ID as u64) as u16,
            sequence: (raw & MAX_SEQUENCE) as u16,
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::with_random_worker()
    }
}

fn current_ms() -> u64 {
    (Utc::now().timestamp_millis().max(0) as u64).saturating_sub(ID_EPOCH_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn ids_are_strictly_increasing() {
        let gen = IdGenerator::new(7);
        let ids = gen.next_ids(20_000);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn ids_fit_in_signed_64_bits() {
        let gen = IdGenerator::new(MAX_WORKER_ID);
        let id = gen.next_id();
        assert!(id.0 < i64::MAX as u64);
    }

    #[test]
    fn decompose_recovers_worker_and_time() {
        let gen = IdGenerator::new(513);
        let before = Utc::now().timestamp_millis() as u64;
        let id = gen.next_id();
        let after = Utc::now().timestamp_millis() as u64;

        let parts = IdGenerator::decompose(id);
        assert_eq!(parts.worker, 513);
        assert!(parts.timestamp_ms >= before && parts.timestamp_ms <= after);
    }

    #[test]
    fn worker_tag_is_masked() {
        let gen = IdGenerator::new(u16::MAX);
        assert_eq!(gen.worker(), MAX_WORKER_ID);
    }

    #[test]
    fn different_workers_never_collide() {
        let a = IdGenerator::new(1);
        let b = IdGenerator::new(2);
        let mut seen = HashSet::new();
        for _ in 0..5_000 {
            assert!(seen.insert(a.next_id()));
            assert!(seen.insert(b.next_id()));
        }
    }

    #[test]
    fn concurrent_callers_get_unique_ids() {
        let gen = Arc::new(IdGenerator::new(3));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = Arc::clone(&gen);
                std::thread::spawn(move || gen.next_ids(5_000))
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 20_000);
    }

    #[test]
    fn record_id_parses_from_decimal() {
        let id: RecordId = "12345".parse().unwrap();
        assert_eq!(id, RecordId(12345));
        assert_eq!(id.to_string(), "12345");
    }
}
