use serde::{Deserialize, Serialize};

/// Declares an `i64`-backed identifier newtype.
///
/// All write-side tables use `BIGSERIAL`/`INTEGER` keys, so every identifier
/// shares the same representation but stays a distinct type.
macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Creates an identifier from a raw database key.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw database key.
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

integer_id! {
    /// Identity of a prescription aggregate.
    PrescriptionId
}

integer_id! {
    /// Identity of a prescriber (physician) in the reference data.
    PrescriberId
}

integer_id! {
    /// Identity of a patient in the reference data.
    PatientId
}

integer_id! {
    /// Identity of a medication in the reference data.
    MedicationId
}

integer_id! {
    /// Identity of a row in the transactional outbox.
    OutboxId
}

impl PrescriptionId {
    /// Aggregate type tag used for outbox rows and broker message keys.
    pub const AGGREGATE_TYPE: &'static str = "prescription";

    /// Returns the broker partition key (`prescription-{id}`).
    ///
    /// All events for one aggregate share this key so they land on the
    /// same partition.
    pub fn message_key(&self) -> String {
        format!("{}-{}", Self::AGGREGATE_TYPE, self.0)
    }
}
