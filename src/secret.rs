use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::Error;

/// Minimum accepted length of a raw secret, in bytes.
pub const MIN_SECRET_LEN: usize = 8;

/// Length of a derived AEAD key (AES-256).
pub const KEY_LEN: usize = 32;

/// What a derived key is used for. Each purpose gets its own HKDF `info`
/// label, so a secret never keys two different cookie kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// The long-lived session cookie.
    Session,
    /// Short-lived login-attempt cookies.
    Transient,
}

impl KeyPurpose {
    fn info(self) -> &'static [u8] {
        match self {
            Self::Session => b"authok-session cookie encryption",
            Self::Transient => b"authok-session transient state",
        }
    }
}

/// Ordered list of raw secrets, newest first.
///
/// New cookies are always sealed with the first secret. Reading tries every
/// secret in order, so a secret can be rotated by prepending the new one and
/// keeping the old one until existing cookies have expired.
#[derive(Clone)]
pub struct SecretSet {
    secrets: Vec<SecretString>,
}

impl std::fmt::Debug for SecretSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSet")
            .field("len", &self.secrets.len())
            .finish()
    }
}

impl SecretSet {
    /// Build a secret set from raw secrets, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the list is empty or any secret is shorter
    /// than [`MIN_SECRET_LEN`] bytes.
    pub fn new<I, S>(secrets: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let secrets: Vec<SecretString> = secrets
            .into_iter()
            .map(|s| SecretString::from(s.into()))
            .collect();
        if secrets.is_empty() {
            return Err(Error::Config("at least one secret is required".into()));
        }
        if secrets
            .iter()
            .any(|s| s.expose_secret().len() < MIN_SECRET_LEN)
        {
            return Err(Error::Config(format!(
                "every secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        Ok(Self { secrets })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Derive one key per secret for `purpose`, in the same order as the set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if HKDF expansion fails.
    pub fn derive_keys(&self, purpose: KeyPurpose) -> Result<Vec<[u8; KEY_LEN]>, Error> {
        self.secrets
            .iter()
            .map(|secret| derive_key(secret.expose_secret().as_bytes(), purpose))
            .collect()
    }
}

/// HKDF-SHA256 expansion of a raw secret into an AEAD key.
fn derive_key(secret: &[u8], purpose: KeyPurpose) -> Result<[u8; KEY_LEN], Error> {
    let hk = Hkdf::<Sha256>::new(None, secret);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(purpose.info(), &mut okm)
        .map_err(|_| Error::Config("HKDF expansion failed".into()))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_set() {
        let err = SecretSet::new(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_short_secret() {
        let err = SecretSet::new(["long-enough-secret", "short"]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn keys_follow_secret_order() {
        let set = SecretSet::new(["newest-secret-value", "oldest-secret-value"]).unwrap();
        let keys = set.derive_keys(KeyPurpose::Session).unwrap();
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0], keys[1]);

        let newest_only = SecretSet::new(["newest-secret-value"]).unwrap();
        assert_eq!(
            newest_only.derive_keys(KeyPurpose::Session).unwrap()[0],
            keys[0]
        );
    }

    #[test]
    fn purposes_derive_distinct_keys() {
        let set = SecretSet::new(["a-shared-secret-value"]).unwrap();
        let session = set.derive_keys(KeyPurpose::Session).unwrap();
        let transient = set.derive_keys(KeyPurpose::Transient).unwrap();
        assert_ne!(session[0], transient[0]);
    }

    #[test]
    fn debug_does_not_leak_secrets() {
        let set = SecretSet::new(["super-secret-value"]).unwrap();
        let rendered = format!("{set:?}");
        assert!(!rendered.contains("super-secret-value"));
    }
}
