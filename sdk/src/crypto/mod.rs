//! Symmetric encryption of document contents.
//!
//! Every document is encrypted with its own key derived from the user's master key
//! and the document id, so a ciphertext cannot be moved to another document
//! without failing authentication.
//!
//! `SymCrypto` uses AES-SIV with a random nonce per call. The text form of a
//! ciphertext is
//!
//! - prefix `siv1:`
//! - URL-safe base64 (no padding) of the nonce (128 bits) followed by the AES-SIV output
//!   (synthetic IV tag and encrypted data).

mod cipher;

pub use cipher::SymCrypto;
use {
    aes_siv::{Aes256SivAead, Key},
    anyhow::Result,
    std::fmt::{self, Debug},
};

/// Key used for the symmetric encryption of one document.
#[derive(Clone, PartialEq, Eq)]
pub struct DocKey(pub(crate) Key<Aes256SivAead>);

impl Debug for DocKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocKey").finish()
    }
}

/// Symmetric crypto primitives used by the envelope codec.
pub trait CryptoContext: Send + Sync {
    /// Derives the encryption key of the document `doc_id`.
    fn passphrase_hash(&self, doc_id: &str) -> Result<DocKey>;

    fn encrypt_sym(&self, plaintext: &str, key: &DocKey) -> Result<String>;

    fn decrypt_sym(&self, ciphertext: &str, key: &DocKey) -> Result<String>;

    /// Returns true if `ciphertext` looks like a value produced by `encrypt_sym`.
    fn is_encrypted_sym(&self, ciphertext: &str) -> bool;
}
