//! Encrypted document content.
//!
//! An encrypted document carries, instead of its plaintext content, an envelope:
//!
//! ```json
//! {"_encrypted_json": "<ciphertext>", "_encryption_scheme": "symkey"}
//! ```
//!
//! The ciphertext is the encryption of the JSON serialization of the plaintext content.

use {
    derive_more::Display,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    std::str::FromStr,
};

pub const ENCRYPTED_JSON_KEY: &str = "_encrypted_json";
pub const ENCRYPTION_SCHEME_KEY: &str = "_encryption_scheme";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionScheme {
    #[display("none")]
    None,
    #[display("symkey")]
    Symkey,
    #[display("pubkey")]
    Pubkey,
}

/// Scheme string that is not one of the known schemes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown encryption scheme `{0}`")]
pub struct UnknownScheme(pub String);

impl FromStr for EncryptionScheme {
    type Err = UnknownScheme;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "symkey" => Ok(Self::Symkey),
            "pubkey" => Ok(Self::Pubkey),
            _ => Err(UnknownScheme(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "_encrypted_json")]
    pub encrypted_json: String,
    #[serde(rename = "_encryption_scheme")]
    pub encryption_scheme: EncryptionScheme,
}

impl Envelope {
    #[must_use]
    #[inline]
    pub fn symkey(ciphertext: String) -> Self {
        Self {
            encrypted_json: ciphertext,
            encryption_scheme: EncryptionScheme::Symkey,
        }
    }

    #[must_use]
    #[inline]
    pub fn to_json(&self) -> String {
        let mut map = Map::new();
        map.insert(
            ENCRYPTED_JSON_KEY.to_owned(),
            Value::String(self.encrypted_json.clone()),
        );
        map.insert(
            ENCRYPTION_SCHEME_KEY.to_owned(),
            Value::String(self.encryption_scheme.to_string()),
        );
        Value::Object(map).to_string()
    }
}

/// Returns true if `content` is tagged as an encryption envelope.
#[must_use]
#[inline]
pub fn is_envelope(content: &Map<String, Value>) -> bool {
    content.contains_key(ENCRYPTION_SCHEME_KEY)
}
