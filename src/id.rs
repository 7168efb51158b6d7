//! Client ids and the cookie-based id manager
//!
//! A client id is two cookie-safe digests back to back: a random part `R`
//! and `M = HMAC(secret, R)`. Anyone can copy an id, but nobody without
//! the server-held secret can fabricate one, so an id that fails the MAC
//! check is treated as absent and never used to address storage.

use crate::clock::{Clock, SystemClock};
use crate::codec::{digest_encode, is_cookie_safe, DIGEST_LEN, ENCODED_DIGEST_LEN};
use crate::config::ClientIdConfig;
use crate::error::{Result, SessionError};
use crate::http::{CookieTransport, ResponseCookie};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Total length of an encoded client id
pub const CLIENT_ID_LEN: usize = 2 * ENCODED_DIGEST_LEN;

/// Expiry used for cookies configured never to expire
/// (Tue, 19 Jan 2038 00:00:00 GMT)
pub const NEVER_EXPIRES: i64 = 2_147_472_000;

/// Process-wide counter mixed into id entropy
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An authenticated client id
///
/// Only `ClientIdManager` constructs these, so holding a `ClientId` means
/// the value passed the MAC check (or was minted by this process).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the underlying string
    pub fn into_string(self) -> String {
        self.0
    }

    /// Leading characters, safe to log
    pub fn short(&self) -> &str {
        short_id(&self.0)
    }
}

/// Log-safe prefix of any client id string
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ClientId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ClientId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Issues and authenticates client ids through a cookie
pub struct ClientIdManager {
    config: ClientIdConfig,
    mac: HmacSha256,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ClientIdManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdManager")
            .field("namespace", &self.config.namespace)
            .field("cookie_lifetime", &self.config.cookie_lifetime)
            .finish_non_exhaustive()
    }
}

impl ClientIdManager {
    /// Create a manager from a validated configuration
    pub fn new(config: ClientIdConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a manager with a fresh cookie name and secret
    pub fn generate() -> Result<Self> {
        Self::new(ClientIdConfig::generate())
    }

    /// Create a manager using a custom time source for cookie expiry
    pub fn with_clock(config: ClientIdConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let mac = HmacSha256::new_from_slice(config.secret.as_bytes())
            .map_err(|e| SessionError::Config(format!("Unusable client id secret: {}", e)))?;
        Ok(Self { config, mac, clock })
    }

    /// Cookie name carrying the id
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Cookie lifetime policy
    pub fn cookie_lifetime(&self) -> Option<u64> {
        self.config.cookie_lifetime
    }

    /// The configuration this manager was built from
    pub fn config(&self) -> &ClientIdConfig {
        &self.config
    }

    fn sign(&self, random_part: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(random_part.as_bytes());
        let tag = mac.finalize().into_bytes();
        digest_encode(&tag[..DIGEST_LEN])
    }

    /// Mint a new random id
    ///
    /// Entropy comes from the OS random source, a thread-local RNG, the
    /// high-resolution clock and a process-wide counter.
    pub fn generate_unique_id(&self) -> ClientId {
        let mut os_bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut os_bytes);
        let thread_bytes: u64 = rand::thread_rng().next_u64();
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha256::new();
        hasher.update(os_bytes);
        hasher.update(thread_bytes.to_le_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(counter.to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        let digest = hasher.finalize();

        let random_part = digest_encode(&digest[..DIGEST_LEN]);
        let tag = self.sign(&random_part);
        ClientId(random_part + &tag)
    }

    /// Check a candidate id; `None` unless the length and MAC are right
    pub fn authenticate(&self, candidate: &str) -> Option<ClientId> {
        if candidate.len() != CLIENT_ID_LEN || !is_cookie_safe(candidate) {
            return None;
        }
        let (random_part, tag) = candidate.split_at(ENCODED_DIGEST_LEN);
        let expected = self.sign(random_part);
        if bool::from(expected.as_bytes().ct_eq(tag.as_bytes())) {
            Some(ClientId(candidate.to_string()))
        } else {
            None
        }
    }

    /// Find the id carried by a request, if any and if authentic
    ///
    /// An id already staged on the response (minted earlier while handling
    /// this same request) takes precedence over the incoming cookie. Either
    /// way the value is authenticated before use.
    pub fn resolve_from_request<R: CookieTransport + ?Sized>(&self, request: &R) -> Option<ClientId> {
        let namespace = self.namespace();
        let candidate = match request.response_cookie(namespace) {
            Some(cookie) => cookie.value.as_str(),
            None => request.request_cookie(namespace)?,
        };

        let id = self.authenticate(candidate);
        if id.is_none() {
            tracing::warn!(
                cookie = %namespace,
                length = candidate.len(),
                "Rejected unauthenticated client id cookie"
            );
        }
        id
    }

    /// Resolve the request's id, minting one if needed, and (re)stage the cookie
    ///
    /// Re-staging on every call renews the cookie's expiry for active clients.
    pub fn issue<R: CookieTransport + ?Sized>(&self, request: &mut R) -> ClientId {
        let id = match self.resolve_from_request(&*request) {
            Some(id) => id,
            None => {
                let id = self.generate_unique_id();
                tracing::debug!(
                    cookie = %self.namespace(),
                    client = %id.short(),
                    "Minted new client id"
                );
                id
            }
        };
        self.set_request_id(request, id.as_str());
        id
    }

    /// Stage `id` as the response cookie using the lifetime policy
    ///
    /// The value is not checked here; an invalid value is rejected the
    /// next time the request is resolved.
    pub fn set_request_id<R: CookieTransport + ?Sized>(&self, request: &mut R, id: &str) {
        let mut cookie = ResponseCookie::new(
            self.config.namespace.clone(),
            id,
            request.application_path(),
        );
        cookie.expires = self.expiry();
        cookie.domain = self.config.domain.clone();
        cookie.secure = self.config.secure;
        cookie.http_only = self.config.http_only;
        request.set_response_cookie(cookie);
    }

    /// Re-stage an already staged id cookie after the mount path changed
    ///
    /// Does nothing if this request has not staged an id yet.
    pub fn on_virtual_host_changed<R: CookieTransport + ?Sized>(&self, request: &mut R) {
        let staged = request
            .response_cookie(self.namespace())
            .map(|cookie| cookie.value.clone());
        if let Some(id) = staged {
            tracing::debug!(
                cookie = %self.namespace(),
                path = %request.application_path(),
                "Refreshing client id cookie path"
            );
            self.set_request_id(request, &id);
        }
    }

    fn expiry(&self) -> Option<i64> {
        match self.config.cookie_lifetime {
            None => None,
            Some(0) => Some(NEVER_EXPIRES),
            Some(secs) => Some(self.clock.now().saturating_add_unsigned(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::http::CookieExchange;
    use std::collections::HashSet;

    fn manager() -> ClientIdManager {
        ClientIdManager::generate().unwrap()
    }

    #[test]
    fn test_generated_id_shape() {
        let bim = manager();
        let id = bim.generate_unique_id();
        assert_eq!(id.as_str().len(), CLIENT_ID_LEN);
        assert!(is_cookie_safe(id.as_str()));
    }

    #[test]
    fn test_generated_ids_authenticate() {
        let bim = manager();
        for _ in 0..100 {
            let id = bim.generate_unique_id();
            assert_eq!(bim.authenticate(id.as_str()), Some(id));
        }
    }

    #[test]
    fn test_generated_ids_unique() {
        let bim = manager();
        let ids: HashSet<ClientId> = (0..10_000).map(|_| bim.generate_unique_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_single_character_mutations_rejected() {
        let bim = manager();
        let id = bim.generate_unique_id().into_string();

        for pos in 0..id.len() {
            let mut bytes = id.clone().into_bytes();
            bytes[pos] = if bytes[pos] == b'A' { b'B' } else { b'A' };
            let mutated = String::from_utf8(bytes).unwrap();
            assert_eq!(bim.authenticate(&mutated), None, "mutation at {}", pos);
        }
    }

    #[test]
    fn test_wrong_length_rejected() {
        let bim = manager();
        let id = bim.generate_unique_id().into_string();

        assert_eq!(bim.authenticate(""), None);
        assert_eq!(bim.authenticate("invalid_id"), None);
        assert_eq!(bim.authenticate(&id[..53]), None);
        assert_eq!(bim.authenticate(&format!("{}A", id)), None);
    }

    #[test]
    fn test_non_ascii_rejected_without_panic() {
        let bim = manager();
        // 54 bytes, multi-byte character straddling the split point
        let candidate = format!("{}é{}", "a".repeat(26), "b".repeat(26));
        assert_eq!(candidate.len(), CLIENT_ID_LEN);
        assert_eq!(bim.authenticate(&candidate), None);
    }

    #[test]
    fn test_ids_from_other_secret_rejected() {
        let a = manager();
        let b = ClientIdManager::new(a.config().clone().with_secret("other")).unwrap();
        let id = a.generate_unique_id();
        assert_eq!(b.authenticate(id.as_str()), None);
    }

    #[test]
    fn test_resolve_without_cookie() {
        let bim = manager();
        let request = CookieExchange::new();
        assert_eq!(bim.resolve_from_request(&request), None);
    }

    #[test]
    fn test_set_then_resolve() {
        let bim = manager();
        let mut request = CookieExchange::new();
        let id = bim.generate_unique_id();

        bim.set_request_id(&mut request, id.as_str());
        assert_eq!(bim.resolve_from_request(&request), Some(id));
    }

    #[test]
    fn test_invalid_staged_id_is_ignored() {
        let bim = manager();
        let mut request = CookieExchange::new();

        bim.set_request_id(&mut request, "invalid_id");
        assert_eq!(bim.resolve_from_request(&request), None);
    }

    #[test]
    fn test_response_cookie_preferred_over_request_cookie() {
        let bim = manager();
        let incoming = bim.generate_unique_id();
        let staged = bim.generate_unique_id();
        let mut request =
            CookieExchange::new().with_request_cookie(bim.namespace(), incoming.as_str());

        bim.set_request_id(&mut request, staged.as_str());
        assert_eq!(bim.resolve_from_request(&request), Some(staged));
    }

    #[test]
    fn test_issue_is_stable_within_request() {
        let bim = manager();
        let mut request = CookieExchange::new();

        let first = bim.issue(&mut request);
        let second = bim.issue(&mut request);
        assert_eq!(first, second);
    }

    #[test]
    fn test_cookie_round_trip() {
        let bim = manager();
        let mut request = CookieExchange::new();
        let id = bim.issue(&mut request);

        let mut request2 = request.replay();
        assert_eq!(bim.resolve_from_request(&request2), Some(id.clone()));
        assert_eq!(bim.issue(&mut request2), id);
    }

    #[test]
    fn test_forged_cookie_gets_fresh_id() {
        let bim = manager();
        let forged = "A".repeat(CLIENT_ID_LEN);
        let mut request = CookieExchange::new().with_request_cookie(bim.namespace(), forged.as_str());

        let id = bim.issue(&mut request);
        assert_ne!(id.as_str(), forged);
        assert_eq!(request.response_cookie(bim.namespace()).unwrap().value, id.as_str());
    }

    #[test]
    fn test_cookie_path_is_application_path() {
        let bim = manager();
        let mut request = CookieExchange::new().with_application_path("/app");
        bim.issue(&mut request);

        let cookie = request.response_cookie(bim.namespace()).unwrap();
        assert_eq!(cookie.path, "/app");
    }

    #[test]
    fn test_default_cookie_has_no_expiry() {
        let bim = manager();
        let mut request = CookieExchange::new();
        bim.issue(&mut request);

        let cookie = request.response_cookie(bim.namespace()).unwrap();
        assert_eq!(cookie.expires, None);
        assert!(!cookie.to_header_value().contains("Expires"));
    }

    #[test]
    fn test_zero_lifetime_never_expires() {
        let config = ClientIdConfig::generate().with_cookie_lifetime(Some(0));
        let bim = ClientIdManager::new(config).unwrap();
        let mut request = CookieExchange::new();
        bim.issue(&mut request);

        let cookie = request.response_cookie(bim.namespace()).unwrap();
        assert_eq!(
            cookie.expires_http_date().as_deref(),
            Some("Tue, 19 Jan 2038 00:00:00 GMT")
        );
    }

    #[test]
    fn test_positive_lifetime_expires_after_issue() {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let config = ClientIdConfig::generate().with_cookie_lifetime(Some(3600));
        let bim = ClientIdManager::with_clock(config, clock.clone()).unwrap();
        let mut request = CookieExchange::new();
        bim.issue(&mut request);

        let cookie = request.response_cookie(bim.namespace()).unwrap();
        assert_eq!(cookie.expires, Some(1_700_003_600));

        // re-issue renews
        clock.advance(60);
        bim.issue(&mut request);
        let cookie = request.response_cookie(bim.namespace()).unwrap();
        assert_eq!(cookie.expires, Some(1_700_003_660));
    }

    #[test]
    fn test_cookie_attributes_from_config() {
        let config = ClientIdConfig::generate()
            .with_domain("example.com")
            .with_secure(true)
            .with_http_only(true);
        let bim = ClientIdManager::new(config).unwrap();
        let mut request = CookieExchange::new();
        bim.issue(&mut request);

        let cookie = request.response_cookie(bim.namespace()).unwrap();
        assert_eq!(cookie.domain.as_deref(), Some("example.com"));
        assert!(cookie.secure);
        assert!(cookie.http_only);
    }

    #[test]
    fn test_virtual_host_change_updates_path() {
        let bim = manager();
        let mut request = CookieExchange::new();
        let id = bim.issue(&mut request);

        request.set_application_path("/foo/bar");
        bim.on_virtual_host_changed(&mut request);

        let cookie = request.response_cookie(bim.namespace()).unwrap();
        assert_eq!(cookie.path, "/foo/bar");
        assert_eq!(cookie.value, id.as_str());
    }

    #[test]
    fn test_virtual_host_change_without_cookie_is_noop() {
        let bim = manager();
        let mut request = CookieExchange::new();
        bim.on_virtual_host_changed(&mut request);
        assert!(request.response_cookie(bim.namespace()).is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClientIdConfig::generate().with_namespace("no spaces allowed");
        assert!(matches!(
            ClientIdManager::new(config),
            Err(SessionError::Config(_))
        ));
    }
}
