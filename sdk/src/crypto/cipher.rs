use {
    crate::crypto::{CryptoContext, DocKey},
    aes_siv::{Aes256SivAead, KeyInit, Nonce, aead::Aead},
    anyhow::{Context as _, Result, format_err},
    base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD},
    cadd::ops::Cadd,
    hmac::{Hmac, Mac},
    hushsync_protocol::credentials::EncryptionKey,
    rand::RngCore,
    sha2::Sha512,
};

const CIPHERTEXT_PREFIX: &str = "siv1:";
const NONCE_LENGTH: usize = 16;
const TAG_LENGTH: usize = 16;
const KEY_LENGTH: usize = 64;

/// AES-SIV implementation of `CryptoContext` keyed by the user's master key.
#[derive(Clone)]
pub struct SymCrypto {
    master_key: EncryptionKey,
}

impl SymCrypto {
    #[must_use]
    #[inline]
    pub fn new(master_key: EncryptionKey) -> Self {
        Self { master_key }
    }

    fn split(ciphertext: &str) -> Option<Vec<u8>> {
        let encoded = ciphertext.strip_prefix(CIPHERTEXT_PREFIX)?;
        let bytes = BASE64_URL_SAFE_NO_PAD.decode(encoded).ok()?;
        let min_length = NONCE_LENGTH.cadd(TAG_LENGTH).ok()?;
        (bytes.len() >= min_length).then_some(bytes)
    }
}

impl CryptoContext for SymCrypto {
    #[inline]
    fn passphrase_hash(&self, doc_id: &str) -> Result<DocKey> {
        let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(self.master_key.get())
            .map_err(|err| format_err!("invalid master key: {err}"))?;
        mac.update(doc_id.as_bytes());
        let digest = mac.finalize().into_bytes();
        let bytes = <[u8; KEY_LENGTH]>::try_from(digest.as_slice())?;
        Ok(DocKey(bytes.into()))
    }

    #[inline]
    fn encrypt_sym(&self, plaintext: &str, key: &DocKey) -> Result<String> {
        let mut nonce = Nonce::default();
        rand::rng().fill_bytes(&mut nonce);
        let encrypted = Aes256SivAead::new(&key.0)
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|err| format_err!("encryption failed: {err}"))?;
        let mut bytes = Vec::with_capacity(nonce.len().cadd(encrypted.len())?);
        bytes.extend_from_slice(&nonce);
        bytes.extend_from_slice(&encrypted);
        Ok(format!(
            "{CIPHERTEXT_PREFIX}{}",
            BASE64_URL_SAFE_NO_PAD.encode(bytes)
        ))
    }

    #[inline]
    fn decrypt_sym(&self, ciphertext: &str, key: &DocKey) -> Result<String> {
        let bytes = Self::split(ciphertext).context("not a symmetric ciphertext")?;
        let (nonce, encrypted) = bytes.split_at(NONCE_LENGTH);
        let nonce = Nonce::try_from(nonce).map_err(|err| format_err!("invalid nonce: {err}"))?;
        let plaintext = Aes256SivAead::new(&key.0)
            .decrypt(&nonce, encrypted)
            .map_err(|err| format_err!("decryption failed: {err}"))?;
        Ok(String::from_utf8(plaintext)?)
    }

    #[inline]
    fn is_encrypted_sym(&self, ciphertext: &str) -> bool {
        Self::split(ciphertext).is_some()
    }
}
