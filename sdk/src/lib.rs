//! Client-side encryption layer of hushsync.
//!
//! Document contents are encrypted before they leave the replica and decrypted
//! after they arrive, so the sync server only ever stores envelopes.

pub mod client;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod exchange;
pub mod pool;
pub mod server;
pub mod signal;
pub mod staging;

pub use crate::{
    crypto::{CryptoContext, SymCrypto},
    error::SyncError,
    exchange::{ExchangeConfig, ExchangeState, SyncTarget},
};
