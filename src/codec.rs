//! Authenticated-encryption cookie codec.
//!
//! A value is serialized to JSON, sealed with AES-256-GCM under a key derived
//! from the newest secret, and laid out as
//!
//! ```text
//! base64url( version(1) | issued_at(8, BE unix seconds) | nonce(12) | ciphertext | tag(16) )
//! ```
//!
//! The version byte and issued-at timestamp are bound as associated data, so
//! neither can be altered without failing authentication. The encoded string
//! is split into cookie-sized chunks named `<name>`, `<name>.1`, `<name>.2`, ...
//! A payload small enough for one cookie has no suffixed chunks at all.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::secret::{KeyPurpose, SecretSet};

/// Current wire-format version.
pub const COOKIE_VERSION: u8 = 1;

/// Common per-cookie ceiling enforced by browsers (name + value + attributes).
pub const BROWSER_COOKIE_LIMIT: usize = 4096;

/// Upper bound on chunk indices probed on read and cleared on delete.
pub const DEFAULT_MAX_CHUNKS: usize = 20;

/// Value budget used when no attribute overhead has been measured.
pub const DEFAULT_CHUNK_SIZE: usize = 3800;

const HEADER_LEN: usize = 1 + 8;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Name of chunk `index` for cookie `base`.
#[must_use]
pub fn chunk_name(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_string()
    } else {
        format!("{base}.{index}")
    }
}

/// A successfully authenticated payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub value: T,
    /// Unix seconds at which the payload was sealed.
    pub issued_at: i64,
}

/// Seals values into chunked cookie strings and opens them again.
#[derive(Clone)]
pub struct CookieCodec {
    ciphers: Vec<Aes256Gcm>,
    chunk_size: usize,
    max_chunks: usize,
}

impl std::fmt::Debug for CookieCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieCodec")
            .field("keys", &self.ciphers.len())
            .field("chunk_size", &self.chunk_size)
            .field("max_chunks", &self.max_chunks)
            .finish()
    }
}

impl CookieCodec {
    /// Build a codec keyed by every secret in `secrets` for `purpose`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if key derivation fails.
    pub fn new(secrets: &SecretSet, purpose: KeyPurpose) -> Result<Self, Error> {
        let ciphers = secrets
            .derive_keys(purpose)?
            .iter()
            .map(|key| Aes256Gcm::new(key.into()))
            .collect();
        Ok(Self {
            ciphers,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunks: DEFAULT_MAX_CHUNKS,
        })
    }

    /// Maximum number of value bytes per cookie.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Maximum number of chunks a payload may span.
    #[must_use]
    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = max_chunks.max(1);
        self
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }

    /// Seal `value` under the newest secret and split it into named chunks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionEncode`] if serialization or encryption fails,
    /// or if the result would need more than the configured maximum chunks.
    pub fn encode<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        issued_at: i64,
    ) -> Result<Vec<(String, String)>, Error> {
        let sealed = self.seal(value, issued_at)?;
        let chunks: Vec<(String, String)> = sealed
            .as_bytes()
            .chunks(self.chunk_size)
            .enumerate()
            .map(|(index, chunk)| {
                // base64url output is ASCII, so any byte boundary is a char boundary
                (
                    chunk_name(name, index),
                    String::from_utf8_lossy(chunk).into_owned(),
                )
            })
            .collect();
        if chunks.len() > self.max_chunks {
            return Err(Error::SessionEncode(format!(
                "payload needs {} cookies, limit is {}",
                chunks.len(),
                self.max_chunks
            )));
        }
        Ok(chunks)
    }

    /// Reassemble the chunks of `name` via `lookup` and open the payload.
    ///
    /// Returns `None` for anything that does not authenticate: a missing base
    /// cookie, a gap in the chunk sequence, an unknown version, or a payload
    /// no secret in the set can open.
    pub fn decode<T, F>(&self, name: &str, lookup: F) -> Option<Decoded<T>>
    where
        T: DeserializeOwned,
        F: Fn(&str) -> Option<String>,
    {
        let present = |index: usize| lookup(&chunk_name(name, index)).filter(|v| !v.is_empty());

        let mut sealed = String::new();
        let mut count = 0;
        while count < self.max_chunks {
            match present(count) {
                Some(part) => sealed.push_str(&part),
                None => break,
            }
            count += 1;
        }
        if count == 0 {
            return None;
        }
        if (count + 1..self.max_chunks).any(|index| present(index).is_some()) {
            tracing::debug!(cookie = name, chunks = count, "cookie chunk sequence has a gap");
            return None;
        }

        self.open(&sealed)
    }

    /// Seal `value` into a single base64url string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionEncode`] if serialization or encryption fails.
    pub fn seal<T: Serialize>(&self, value: &T, issued_at: i64) -> Result<String, Error> {
        let cipher = self
            .ciphers
            .first()
            .ok_or_else(|| Error::SessionEncode("no encryption key".into()))?;
        let plaintext =
            serde_json::to_vec(value).map_err(|e| Error::SessionEncode(e.to_string()))?;

        let mut header = [0u8; HEADER_LEN];
        header[0] = COOKIE_VERSION;
        header[1..].copy_from_slice(&issued_at.to_be_bytes());
        let nonce_bytes: [u8; NONCE_LEN] = rand::rng().random();

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: &header,
                },
            )
            .map_err(|_| Error::SessionEncode("encryption failed".into()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Open a string produced by [`seal`](Self::seal), trying each secret in order.
    pub fn open<T: DeserializeOwned>(&self, sealed: &str) -> Option<Decoded<T>> {
        let data = URL_SAFE_NO_PAD.decode(sealed).ok()?;
        if data.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
            return None;
        }
        let (header, rest) = data.split_at(HEADER_LEN);
        if header[0] != COOKIE_VERSION {
            tracing::debug!(version = header[0], "unrecognized cookie version");
            return None;
        }
        let mut issued_at = [0u8; 8];
        issued_at.copy_from_slice(&header[1..]);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let plaintext = self.ciphers.iter().find_map(|cipher| {
            cipher
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: ciphertext,
                        aad: header,
                    },
                )
                .ok()
        })?;

        let value = serde_json::from_slice(&plaintext).ok()?;
        Some(Decoded {
            value,
            issued_at: i64::from_be_bytes(issued_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        sub: String,
        blob: String,
    }

    fn codec(secrets: &[&str]) -> CookieCodec {
        CookieCodec::new(
            &SecretSet::new(secrets.iter().copied()).unwrap(),
            KeyPurpose::Session,
        )
        .unwrap()
    }

    fn jar(pairs: &[(String, String)]) -> HashMap<String, String> {
        pairs.iter().cloned().collect()
    }

    fn payload(blob_len: usize) -> Payload {
        Payload {
            sub: "user|123".into(),
            blob: "x".repeat(blob_len),
        }
    }

    #[test]
    fn roundtrip_single_cookie() {
        let codec = codec(&["first-secret-value"]);
        let value = payload(10);
        let pairs = codec.encode("appSession", &value, 1_700_000_000).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "appSession");

        let cookies = jar(&pairs);
        let decoded: Decoded<Payload> = codec
            .decode("appSession", |n| cookies.get(n).cloned())
            .unwrap();
        assert_eq!(decoded.value, value);
        assert_eq!(decoded.issued_at, 1_700_000_000);
    }

    #[test]
    fn large_payload_is_chunked_and_reassembled() {
        let codec = codec(&["first-secret-value"]).with_chunk_size(500);
        let value = payload(2_000);
        let pairs = codec.encode("appSession", &value, 0).unwrap();
        assert!(pairs.len() > 1);
        assert_eq!(pairs[1].0, "appSession.1");
        assert!(pairs.iter().all(|(_, v)| v.len() <= 500));

        let cookies = jar(&pairs);
        let decoded: Decoded<Payload> = codec
            .decode("appSession", |n| cookies.get(n).cloned())
            .unwrap();
        assert_eq!(decoded.value, value);
    }

    #[test]
    fn missing_middle_chunk_fails_closed() {
        let codec = codec(&["first-secret-value"]).with_chunk_size(300);
        let pairs = codec.encode("appSession", &payload(2_000), 0).unwrap();
        assert!(pairs.len() >= 3);

        let mut cookies = jar(&pairs);
        cookies.remove("appSession.1");
        let decoded: Option<Decoded<Payload>> =
            codec.decode("appSession", |n| cookies.get(n).cloned());
        assert!(decoded.is_none());
    }

    #[test]
    fn missing_base_chunk_fails_closed() {
        let codec = codec(&["first-secret-value"]).with_chunk_size(300);
        let pairs = codec.encode("appSession", &payload(1_000), 0).unwrap();
        let mut cookies = jar(&pairs);
        cookies.remove("appSession");
        let decoded: Option<Decoded<Payload>> =
            codec.decode("appSession", |n| cookies.get(n).cloned());
        assert!(decoded.is_none());
    }

    #[test]
    fn flipped_bits_never_decode() {
        let codec = codec(&["first-secret-value"]);
        let sealed = codec.seal(&payload(20), 42).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&sealed).unwrap();

        for byte in 0..raw.len() {
            for bit in 0..8 {
                let mut tampered = raw.clone();
                tampered[byte] ^= 1 << bit;
                let encoded = URL_SAFE_NO_PAD.encode(&tampered);
                let opened: Option<Decoded<Payload>> = codec.open(&encoded);
                assert!(opened.is_none(), "bit {bit} of byte {byte} went unnoticed");
            }
        }
    }

    #[test]
    fn garbage_input_is_rejected() {
        let codec = codec(&["first-secret-value"]);
        for input in ["", "not base64!!", "AAAA", &"A".repeat(200)] {
            let opened: Option<Decoded<Payload>> = codec.open(input);
            assert!(opened.is_none());
        }
    }

    #[test]
    fn rotated_secret_still_decodes() {
        let old = codec(&["secret-a-value"]);
        let rotated = codec(&["secret-b-value", "secret-a-value"]);
        let value = payload(5);

        let sealed = old.seal(&value, 7).unwrap();
        let opened: Decoded<Payload> = rotated.open(&sealed).unwrap();
        assert_eq!(opened.value, value);

        let unrelated = codec(&["secret-c-value"]);
        assert!(unrelated.open::<Payload>(&sealed).is_none());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let codec = codec(&["first-secret-value"]);
        let sealed = codec.seal(&payload(5), 0).unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        raw[0] = 2;
        assert!(
            codec
                .open::<Payload>(&URL_SAFE_NO_PAD.encode(raw))
                .is_none()
        );
    }

    #[test]
    fn exceeding_max_chunks_is_an_error() {
        let codec = codec(&["first-secret-value"])
            .with_chunk_size(100)
            .with_max_chunks(2);
        let err = codec.encode("s", &payload(1_000), 0).unwrap_err();
        assert!(matches!(err, Error::SessionEncode(_)));
    }
}
