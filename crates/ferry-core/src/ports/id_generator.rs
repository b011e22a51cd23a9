//! IdGenerator port - ID generation.
//!
//! IDs must never be reused, including across restarts where the in-memory
//! counter state is gone. ULIDs give us that without any persisted sequence:
//! the millisecond timestamp plus 80 random bits.

use crate::domain::OperationId;
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_operation_id(&self) -> OperationId;
}

/// ULID-based generator. The timestamp part comes from the injected clock,
/// so a `FixedClock` gives IDs with a deterministic time prefix.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    /// Create a generator stamping ids with `clock`.
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_operation_id(&self) -> OperationId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        OperationId::from(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_operation_id();
        let id2 = id_gen.generate_operation_id();
        let id3 = id_gen.generate_operation_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_shares_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_operation_id();
        let id2 = id_gen.generate_operation_id();

        // random part still differs
        assert_ne!(id1, id2);

        assert_eq!(id1.as_ulid().timestamp_ms(), id2.as_ulid().timestamp_ms());
        assert_eq!(
            id1.as_ulid().timestamp_ms(),
            fixed_time.timestamp_millis() as u64
        );
    }

    #[test]
    fn ids_display_with_operation_prefix() {
        let id_gen = UlidGenerator::new(SystemClock);
        assert!(id_gen.generate_operation_id().to_string().starts_with("op-"));
    }
}
