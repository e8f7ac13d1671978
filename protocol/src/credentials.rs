use {
    aes_siv::{Aes256SivAead, Key, KeyInit, aead::array::Array},
    anyhow::{Error, bail, ensure, format_err},
    base64::{
        Engine,
        display::Base64Display,
        prelude::{BASE64_STANDARD, BASE64_URL_SAFE_NO_PAD},
    },
    rand::distr::{Alphanumeric, SampleString},
    serde::{Deserialize, Deserializer, Serialize, Serializer, de},
    std::{
        borrow::Cow,
        fmt::{self, Debug, Display},
        str::FromStr,
    },
};

/// Secret token used by the client to authenticate sync requests.
#[derive(Clone, Deserialize, Serialize)]
pub struct AccessToken(String);

const ACCESS_TOKEN_LENGTH: usize = 64;

impl AccessToken {
    #[must_use]
    #[inline]
    pub fn generate() -> Self {
        Self(Alphanumeric.sample_string(&mut rand::rng(), ACCESS_TOKEN_LENGTH))
    }

    #[must_use]
    #[inline]
    pub fn as_unmasked_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccessToken {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure!(
            s.len() == ACCESS_TOKEN_LENGTH,
            "invalid length; got {}, expected {ACCESS_TOKEN_LENGTH}",
            s.len(),
        );
        if let Some(c) = s.chars().find(|c| !c.is_ascii_alphanumeric()) {
            bail!("must be alphanumeric but contains invalid character `{c}`");
        }
        Ok(Self(s.to_owned()))
    }
}

/// Compares in time that depends only on the token length.
impl PartialEq for AccessToken {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        let (left, right) = (self.0.as_bytes(), other.0.as_bytes());
        left.len() == right.len()
            && left
                .iter()
                .zip(right)
                .fold(0_u8, |diff, (a, b)| diff | (a ^ b))
                == 0
    }
}

impl Eq for AccessToken {}

impl Debug for AccessToken {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken").finish()
    }
}

/// Token credentials of a user: the user's uuid and their access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCredentials {
    pub uuid: String,
    pub token: AccessToken,
}

const TOKEN_AUTH_PREFIX: &str = "Token ";

impl TokenCredentials {
    /// Value of the `Authorization` header for a request signed with these credentials.
    #[must_use]
    #[inline]
    pub fn authorization_header(&self) -> String {
        let auth = format!("{}:{}", self.uuid, self.token.as_unmasked_str());
        format!("{TOKEN_AUTH_PREFIX}{}", BASE64_STANDARD.encode(auth))
    }

    /// Parses the value of an `Authorization` header produced by `authorization_header`.
    #[inline]
    pub fn from_authorization_header(value: &str) -> anyhow::Result<Self> {
        let encoded = value
            .strip_prefix(TOKEN_AUTH_PREFIX)
            .ok_or_else(|| format_err!("authorization header is not Token"))?;
        let decoded = String::from_utf8(BASE64_STANDARD.decode(encoded.trim())?)?;
        let (uuid, token) = decoded
            .split_once(':')
            .ok_or_else(|| format_err!("missing `:` in token credentials"))?;
        Ok(Self {
            uuid: uuid.to_owned(),
            token: token.parse()?,
        })
    }
}

/// Master secret from which per-document keys are derived.
///
/// All replicas of a user should use the same encryption key.
#[derive(Clone)]
pub struct EncryptionKey(Key<Aes256SivAead>);

const KEY_LENGTH: usize = 64;

impl EncryptionKey {
    #[inline]
    pub fn generate() -> anyhow::Result<Self> {
        Ok(Self(Aes256SivAead::generate_key()?))
    }

    #[must_use]
    #[inline]
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(Array::from(bytes))
    }

    #[must_use]
    #[inline]
    pub fn get(&self) -> &Key<Aes256SivAead> {
        &self.0
    }

    #[must_use]
    #[inline]
    pub fn display_unmasked(&self) -> impl Display + '_ {
        Base64Display::new(self.0.as_ref(), &BASE64_URL_SAFE_NO_PAD)
    }
}

impl<'de> Deserialize<'de> for EncryptionKey {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Cow::<'_, str>::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

impl Serialize for EncryptionKey {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        BASE64_URL_SAFE_NO_PAD.encode(self.0).serialize(serializer)
    }
}

impl FromStr for EncryptionKey {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64_URL_SAFE_NO_PAD.decode(s)?;
        let array = <[u8; KEY_LENGTH]>::try_from(bytes).map_err(|bytes| {
            format_err!("invalid length; got {}, expected {KEY_LENGTH}", bytes.len())
        })?;
        Ok(Self::from_bytes(array))
    }
}

impl Debug for EncryptionKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey").finish()
    }
}

#[cfg(test)]
#[expect(clippy::string_slice, reason = "test")]
mod test {
    use super::*;

    static TOKEN: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789ab";

    #[test]
    fn access_token_from_str() {
        assert_eq!(
            AccessToken::from_str(TOKEN).unwrap().as_unmasked_str(),
            TOKEN,
        );
        AccessToken::from_str("").unwrap_err();
        AccessToken::from_str(&TOKEN[1..]).unwrap_err();
        AccessToken::from_str(&format!("{TOKEN}c")).unwrap_err();
        AccessToken::from_str(&format!("{}:", &TOKEN[1..])).unwrap_err();
    }

    #[test]
    fn access_token_eq() {
        let token = AccessToken::from_str(TOKEN).unwrap();
        assert_eq!(token, AccessToken::from_str(TOKEN).unwrap());
        let mut other = TOKEN.to_owned();
        other.replace_range(63.., "c");
        assert_ne!(token, AccessToken::from_str(&other).unwrap());
        assert_ne!(token, AccessToken::generate());
        assert_ne!(token, AccessToken(TOKEN[1..].to_owned()));
    }

    #[test]
    fn authorization_header_roundtrip() {
        let credentials = TokenCredentials {
            uuid: "user-1".into(),
            token: TOKEN.parse().unwrap(),
        };
        let header = credentials.authorization_header();
        assert!(header.starts_with("Token "));
        assert_eq!(
            TokenCredentials::from_authorization_header(&header).unwrap(),
            credentials
        );
        TokenCredentials::from_authorization_header("Bearer abc").unwrap_err();
        TokenCredentials::from_authorization_header("Token !!!").unwrap_err();
    }

    #[test]
    fn encryption_key_from_str() {
        static KEY: &str = "qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqg";
        assert_eq!(
            EncryptionKey::from_str(KEY)
                .unwrap()
                .display_unmasked()
                .to_string(),
            KEY,
        );
        EncryptionKey::from_str("").unwrap_err();
        EncryptionKey::from_str("qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqo").unwrap_err();
        EncryptionKey::from_str(&format!("{KEY}:")).unwrap_err();
    }
}
