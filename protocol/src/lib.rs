pub mod credentials;
mod document;
pub mod endpoints;
pub mod envelope;
pub mod stream;
pub mod util;

pub use crate::document::Document;
use {
    derive_more::{Display, From, Into},
    rand::distr::{Alphanumeric, SampleString},
    serde::{Deserialize, Serialize},
};

/// Monotonic counter identifying a replica's state version.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    Serialize,
    Deserialize,
    From,
    Into,
)]
pub struct Generation(pub u64);

impl Generation {
    #[must_use]
    #[inline]
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

/// Opaque token identifying the state transition that produced a generation.
///
/// The empty id is valid and denotes "no transaction yet".
#[derive(
    Debug, Default, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize, From, Into,
)]
pub struct TransactionId(pub String);

const TRANSACTION_ID_LENGTH: usize = 24;

impl TransactionId {
    #[must_use]
    #[inline]
    pub fn generate() -> Self {
        Self(format!(
            "T-{}",
            Alphanumeric.sample_string(&mut rand::rng(), TRANSACTION_ID_LENGTH)
        ))
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransactionId {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize, From, Into)]
pub struct ReplicaUid(pub String);

impl ReplicaUid {
    #[must_use]
    #[inline]
    pub fn generate() -> Self {
        Self(Alphanumeric.sample_string(&mut rand::rng(), 32))
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ReplicaUid {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}
