//! Conversion between plaintext document contents and encryption envelopes.

use {
    crate::{
        crypto::CryptoContext,
        error::{Result, SyncError},
    },
    hushsync_protocol::{
        Document,
        envelope::{
            ENCRYPTED_JSON_KEY, ENCRYPTION_SCHEME_KEY, EncryptionScheme, Envelope, is_envelope,
        },
    },
    serde_json::{Map, Value},
};

/// Encrypts the JSON serialization of a document's content.
///
/// Returns the JSON serialization of a `symkey` envelope.
#[inline]
pub fn encrypt_doc_json(
    crypto: &dyn CryptoContext,
    doc_id: &str,
    plaintext_json: &str,
) -> Result<String> {
    let key = crypto
        .passphrase_hash(doc_id)
        .map_err(|err| SyncError::EncryptionFailed(format!("{err:#}")))?;
    let ciphertext = crypto
        .encrypt_sym(plaintext_json, &key)
        .map_err(|err| SyncError::EncryptionFailed(format!("{err:#}")))?;
    if !crypto.is_encrypted_sym(&ciphertext) {
        return Err(SyncError::EncryptionFailed(format!(
            "produced ciphertext for `{doc_id}` is not recognized as symmetric ciphertext"
        )));
    }
    Ok(Envelope::symkey(ciphertext).to_json())
}

/// Decrypts the JSON serialization of an envelope into the plaintext JSON.
#[inline]
pub fn decrypt_doc_json(
    crypto: &dyn CryptoContext,
    doc_id: &str,
    envelope_json: &str,
) -> Result<String> {
    match serde_json::from_str(envelope_json) {
        Ok(Value::Object(envelope)) => decrypt_envelope(crypto, doc_id, &envelope),
        Ok(other) => Err(SyncError::MalformedEnvelope(format!(
            "envelope of `{doc_id}` is not an object: {other}"
        ))),
        Err(err) => Err(SyncError::MalformedEnvelope(format!(
            "envelope of `{doc_id}` is not valid JSON: {err}"
        ))),
    }
}

/// Decrypts an already parsed envelope into the plaintext JSON.
#[inline]
pub fn decrypt_envelope(
    crypto: &dyn CryptoContext,
    doc_id: &str,
    envelope: &Map<String, Value>,
) -> Result<String> {
    let (Some(ciphertext), Some(scheme)) = (
        envelope.get(ENCRYPTED_JSON_KEY),
        envelope.get(ENCRYPTION_SCHEME_KEY),
    ) else {
        return Err(SyncError::MalformedEnvelope(format!(
            "envelope of `{doc_id}` must contain `{ENCRYPTED_JSON_KEY}` and `{ENCRYPTION_SCHEME_KEY}`"
        )));
    };
    let scheme = match scheme {
        Value::String(scheme) => scheme
            .parse::<EncryptionScheme>()
            .map_err(|err| SyncError::UnsupportedScheme(err.0))?,
        other => return Err(SyncError::UnsupportedScheme(other.to_string())),
    };
    if scheme != EncryptionScheme::Symkey {
        return Err(SyncError::UnsupportedScheme(scheme.to_string()));
    }
    let Value::String(ciphertext) = ciphertext else {
        return Err(SyncError::MalformedEnvelope(format!(
            "ciphertext of `{doc_id}` is not a string"
        )));
    };
    if !crypto.is_encrypted_sym(ciphertext) {
        return Err(SyncError::MalformedEnvelope(format!(
            "ciphertext of `{doc_id}` is not recognized as symmetric ciphertext"
        )));
    }
    let key = crypto
        .passphrase_hash(doc_id)
        .map_err(|err| SyncError::MalformedEnvelope(format!("{err:#}")))?;
    crypto
        .decrypt_sym(ciphertext, &key)
        .map_err(|err| SyncError::MalformedEnvelope(format!("`{doc_id}`: {err:#}")))
}

/// Wire `content` of an outgoing document: envelope JSON string, or `null` for a tombstone.
#[inline]
pub fn encrypt_document(crypto: &dyn CryptoContext, doc: &Document) -> Result<Value> {
    match doc.get_json() {
        Some(json) => Ok(Value::String(encrypt_doc_json(crypto, &doc.doc_id, &json)?)),
        None => Ok(Value::Null),
    }
}

/// Content of an incoming document before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingContent {
    /// Raw JSON text: an envelope, a plain document body or `null`.
    Raw(String),
    Parsed(Value),
}

impl From<String> for IncomingContent {
    #[inline]
    fn from(value: String) -> Self {
        Self::Raw(value)
    }
}

impl From<&str> for IncomingContent {
    #[inline]
    fn from(value: &str) -> Self {
        Self::Raw(value.to_owned())
    }
}

impl From<Value> for IncomingContent {
    #[inline]
    fn from(value: Value) -> Self {
        Self::Parsed(value)
    }
}

impl From<Option<Map<String, Value>>> for IncomingContent {
    #[inline]
    fn from(value: Option<Map<String, Value>>) -> Self {
        Self::Parsed(value.map_or(Value::Null, Value::Object))
    }
}

fn parse_json(doc_id: &str, json: &str) -> Result<Value> {
    serde_json::from_str(json).map_err(|err| {
        SyncError::MalformedEnvelope(format!("content of `{doc_id}` is not valid JSON: {err}"))
    })
}

fn into_content(doc_id: &str, value: Value) -> Result<Option<Map<String, Value>>> {
    match value {
        Value::Null => Ok(None),
        Value::Object(content) => Ok(Some(content)),
        other => Err(SyncError::MalformedEnvelope(format!(
            "content of `{doc_id}` must be an object or null, got {other}"
        ))),
    }
}

/// Turns incoming content into a document body.
///
/// Envelopes are decrypted, plain objects and tombstones pass through unchanged.
#[inline]
pub fn normalize_content(
    crypto: &dyn CryptoContext,
    doc_id: &str,
    content: IncomingContent,
) -> Result<Option<Map<String, Value>>> {
    let value = match content {
        IncomingContent::Raw(json) => parse_json(doc_id, &json)?,
        IncomingContent::Parsed(value) => value,
    };
    // Wire entries carry the envelope as a JSON string.
    let value = match value {
        Value::String(json) => parse_json(doc_id, &json)?,
        other => other,
    };
    match value {
        Value::Object(map) if is_envelope(&map) => {
            let plaintext = decrypt_envelope(crypto, doc_id, &map)?;
            into_content(doc_id, parse_json(doc_id, &plaintext)?)
        }
        other => into_content(doc_id, other),
    }
}

/// Builds a plaintext document from an incoming entry.
#[inline]
pub fn decrypt_document(
    crypto: &dyn CryptoContext,
    doc_id: String,
    rev: Option<String>,
    content: IncomingContent,
) -> Result<Document> {
    let content = normalize_content(crypto, &doc_id, content)?;
    Ok(Document::new(doc_id, rev, content))
}

#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        crate::crypto::SymCrypto,
        hushsync_protocol::credentials::EncryptionKey,
        serde_json::json,
    };

    pub(crate) fn crypto() -> SymCrypto {
        SymCrypto::new(EncryptionKey::generate().unwrap())
    }

    #[test]
    fn roundtrip() {
        let crypto = crypto();
        for plaintext in [r#"{}"#, r#"{"key":"secret value"}"#, r#"{"nested":{"list":[1,2,3]},"s":"ü"}"#] {
            let envelope = encrypt_doc_json(&crypto, "doc1", plaintext).unwrap();
            assert!(!envelope.contains("secret value"));
            assert_eq!(decrypt_doc_json(&crypto, "doc1", &envelope).unwrap(), plaintext);
        }
    }

    #[test]
    fn envelope_shape() {
        let crypto = crypto();
        let envelope = encrypt_doc_json(&crypto, "doc1", "{}").unwrap();
        let Value::Object(map) = serde_json::from_str(&envelope).unwrap() else {
            panic!("envelope is not an object");
        };
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(ENCRYPTION_SCHEME_KEY), Some(&json!("symkey")));
        let ciphertext = map.get(ENCRYPTED_JSON_KEY).unwrap().as_str().unwrap();
        assert!(crypto.is_encrypted_sym(ciphertext));
    }

    #[test]
    fn wrong_doc_id() {
        let crypto = crypto();
        let envelope = encrypt_doc_json(&crypto, "doc1", "{}").unwrap();
        assert!(matches!(
            decrypt_doc_json(&crypto, "doc2", &envelope),
            Err(SyncError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn unsupported_scheme() {
        let crypto = crypto();
        let envelope = encrypt_doc_json(&crypto, "doc1", "{}").unwrap();
        let mut map: Map<String, Value> = serde_json::from_str(&envelope).unwrap();
        for scheme in [json!("none"), json!("pubkey"), json!("rot13"), json!(""), json!(1)] {
            map.insert(ENCRYPTION_SCHEME_KEY.into(), scheme.clone());
            let result = decrypt_doc_json(&crypto, "doc1", &Value::Object(map.clone()).to_string());
            assert!(
                matches!(result, Err(SyncError::UnsupportedScheme(_))),
                "{scheme}: {result:?}"
            );
        }
    }

    #[test]
    fn malformed_envelope() {
        let crypto = crypto();
        for envelope in [
            "",
            "not json",
            "[]",
            r#"{"_encrypted_json": "siv1:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"}"#,
            r#"{"_encryption_scheme": "symkey"}"#,
            r#"{"_encrypted_json": "plaintext", "_encryption_scheme": "symkey"}"#,
            r#"{"_encrypted_json": 5, "_encryption_scheme": "symkey"}"#,
            r#"{"_encrypted_json": "siv1:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA", "_encryption_scheme": "symkey"}"#,
        ] {
            let result = decrypt_doc_json(&crypto, "doc1", envelope);
            assert!(
                matches!(result, Err(SyncError::MalformedEnvelope(_))),
                "{envelope}: {result:?}"
            );
        }
    }

    #[test]
    fn normalize() {
        let crypto = crypto();
        let envelope = encrypt_doc_json(&crypto, "doc1", r#"{"a":1}"#).unwrap();
        let expected = json!({"a": 1}).as_object().cloned();

        let raw = normalize_content(&crypto, "doc1", envelope.clone().into()).unwrap();
        assert_eq!(raw, expected);
        let wire = normalize_content(&crypto, "doc1", Value::String(envelope.clone()).into());
        assert_eq!(wire.unwrap(), expected);
        let parsed: Value = serde_json::from_str(&envelope).unwrap();
        assert_eq!(normalize_content(&crypto, "doc1", parsed.into()).unwrap(), expected);

        assert_eq!(normalize_content(&crypto, "doc1", "null".into()).unwrap(), None);
        assert_eq!(normalize_content(&crypto, "doc1", Value::Null.into()).unwrap(), None);
        assert_eq!(
            normalize_content(&crypto, "doc1", r#"{"plain":true}"#.into()).unwrap(),
            json!({"plain": true}).as_object().cloned()
        );
        normalize_content(&crypto, "doc1", "[1]".into()).unwrap_err();
    }

    #[test]
    fn tombstone_is_not_encrypted() {
        let crypto = crypto();
        let doc = Document::tombstone("doc1", Some("rev".into()));
        assert_eq!(encrypt_document(&crypto, &doc).unwrap(), Value::Null);

        let doc = Document::from_json("doc1", Some("rev".into()), r#"{"x":"secret value"}"#).unwrap();
        let Value::String(envelope) = encrypt_document(&crypto, &doc).unwrap() else {
            panic!("expected envelope string");
        };
        assert!(!envelope.contains("secret value"));
        let decrypted =
            decrypt_document(&crypto, "doc1".into(), Some("rev".into()), envelope.into()).unwrap();
        assert_eq!(decrypted, doc);
    }
}
