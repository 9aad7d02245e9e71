//! Signed-cookie session storage
//!
//! The whole session is JSON-encoded, base64'd and signed:
//!
//! ```text
//! eyJzZXNzaW9uX2lkIjoiLi4uIn0=--1f3a...c9
//! ```
//!
//! Verification tries the current secret first, then each previous one, so
//! secrets can rotate without logging everyone out.

use super::store::{SessionData, SessionStore};
use super::{generate_sid, SessionOptions, DEFAULT_SID_BITS};
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ring::hmac;
use std::sync::Arc;

/// Data key holding the session id inside the cookie payload
pub const SESSION_ID_KEY: &str = "session_id";

/// Browsers drop cookies larger than this
pub const MAX_COOKIE_SIZE: usize = 4096;

const DIGEST_SEPARATOR: &str = "--";

/// Keyed message authentication, the only crypto the session layer needs
pub trait MessageAuthenticator: Send + Sync {
    fn digest(&self, secret: &[u8], data: &[u8]) -> Vec<u8>;

    /// Must compare in constant time
    fn verify(&self, secret: &[u8], data: &[u8], digest: &[u8]) -> bool;
}

/// HMAC-SHA256 via ring
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha256;

impl MessageAuthenticator for HmacSha256 {
    fn digest(&self, secret: &[u8], data: &[u8]) -> Vec<u8> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
        hmac::sign(&key, data).as_ref().to_vec()
    }

    fn verify(&self, secret: &[u8], data: &[u8], digest: &[u8]) -> bool {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
        hmac::verify(&key, data, digest).is_ok()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// `payload--hexdigest` signing with secret rotation
#[derive(Clone)]
pub struct CookieSigner {
    secrets: Vec<Vec<u8>>,
    authenticator: Arc<dyn MessageAuthenticator>,
}

impl CookieSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref().to_vec();
        if secret.len() < 32 {
            tracing::warn!(len = secret.len(), "session secret is shorter than 32 bytes");
        }
        Self {
            secrets: vec![secret],
            authenticator: Arc::new(HmacSha256),
        }
    }

    /// Keep accepting cookies signed with a retired secret
    pub fn old_secret(mut self, secret: impl AsRef<[u8]>) -> Self {
        self.secrets.push(secret.as_ref().to_vec());
        self
    }

    pub fn authenticator(mut self, authenticator: impl MessageAuthenticator + 'static) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Sign with the current secret
    pub fn sign(&self, payload: &str) -> String {
        let digest = self.authenticator.digest(&self.secrets[0], payload.as_bytes());
        format!("{}{}{}", payload, DIGEST_SEPARATOR, hex_encode(&digest))
    }

    /// The payload of a correctly signed cookie
    pub fn verify<'c>(&self, cookie: &'c str) -> Option<&'c str> {
        let (payload, digest) = cookie.rsplit_once(DIGEST_SEPARATOR)?;
        let digest = hex_decode(digest)?;
        self.secrets
            .iter()
            .any(|secret| self.authenticator.verify(secret, payload.as_bytes(), &digest))
            .then_some(payload)
    }
}

impl std::fmt::Debug for CookieSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSigner").field("secrets", &self.secrets.len()).finish()
    }
}

/// Session store keeping all data in the signed cookie itself
#[derive(Debug, Clone)]
pub struct CookieStore {
    signer: CookieSigner,
    sid_bits: usize,
}

impl CookieStore {
    pub fn new(signer: CookieSigner) -> Self {
        Self {
            signer,
            sid_bits: DEFAULT_SID_BITS,
        }
    }

    fn decode(&self, cookie: &str) -> Option<SessionData> {
        let payload = self.signer.verify(cookie)?;
        let json = STANDARD.decode(payload).ok()?;
        serde_json::from_slice(&json).ok()
    }
}

impl SessionStore for CookieStore {
    fn find_session(&self, cookie: &str) -> Result<Option<(String, SessionData)>> {
        let Some(mut data) = self.decode(cookie) else {
            tracing::debug!("discarding session cookie with bad signature or payload");
            return Ok(None);
        };
        let sid = match data.remove(SESSION_ID_KEY) {
            Some(serde_json::Value::String(sid)) => sid,
            _ => generate_sid(self.sid_bits),
        };
        Ok(Some((sid, data)))
    }

    fn write_session(&self, sid: &str, data: &SessionData, _options: &SessionOptions) -> Result<String> {
        let mut payload = data.clone();
        payload.insert(SESSION_ID_KEY.to_string(), serde_json::Value::String(sid.to_string()));
        let json = serde_json::to_vec(&payload).map_err(|e| Error::SessionBackend(e.to_string()))?;
        let cookie = self.signer.sign(&STANDARD.encode(json));
        if cookie.len() > MAX_COOKIE_SIZE {
            return Err(Error::SessionBackend(format!(
                "cookie data size exceeds {} bytes",
                MAX_COOKIE_SIZE
            )));
        }
        Ok(cookie)
    }

    fn delete_session(&self, _sid: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "0123456789abcdef0123456789abcdef-current";
    const OLD_SECRET: &str = "0123456789abcdef0123456789abcdef-previous";

    #[test]
    fn test_sign_verify() {
        let signer = CookieSigner::new(SECRET);
        let signed = signer.sign("payload");
        assert!(signed.starts_with("payload--"));
        assert_eq!(signer.verify(&signed), Some("payload"));
        assert_eq!(CookieSigner::new("other secret of enough length....").verify(&signed), None);
    }

    #[test]
    fn test_tampering_fails() {
        let signer = CookieSigner::new(SECRET);
        let signed = signer.sign("payload");

        let tampered_payload = signed.replacen("payload", "paylaod", 1);
        assert_eq!(signer.verify(&tampered_payload), None);

        let mut tampered_digest = signed.clone();
        let last = tampered_digest.pop().unwrap();
        tampered_digest.push(if last == '0' { '1' } else { '0' });
        assert_eq!(signer.verify(&tampered_digest), None);

        assert_eq!(signer.verify("payload"), None);
        assert_eq!(signer.verify("payload--zz"), None);
    }

    #[test]
    fn test_secret_rotation() {
        let old = CookieSigner::new(OLD_SECRET);
        let signed = old.sign("payload");

        let rotated = CookieSigner::new(SECRET).old_secret(OLD_SECRET);
        assert_eq!(rotated.verify(&signed), Some("payload"));
        // New cookies use the current secret
        assert_eq!(CookieSigner::new(SECRET).verify(&rotated.sign("x")), Some("x"));
    }

    #[test]
    fn test_cookie_store_roundtrip() {
        let store = CookieStore::new(CookieSigner::new(SECRET));
        let mut data = SessionData::new();
        data.insert("counter".into(), json!(3));

        let cookie = store.write_session("abc123", &data, &SessionOptions::default()).unwrap();
        let (sid, found) = store.find_session(&cookie).unwrap().unwrap();
        assert_eq!(sid, "abc123");
        assert_eq!(found.get("counter"), Some(&json!(3)));
        assert!(!found.contains_key(SESSION_ID_KEY));

        assert!(store.find_session("garbage--00").unwrap().is_none());
    }

    #[test]
    fn test_oversized_cookie() {
        let store = CookieStore::new(CookieSigner::new(SECRET));
        let mut data = SessionData::new();
        data.insert("blob".into(), json!("x".repeat(MAX_COOKIE_SIZE)));
        let result = store.write_session("abc", &data, &SessionOptions::default());
        assert!(matches!(result, Err(Error::SessionBackend(_))));
    }
}
