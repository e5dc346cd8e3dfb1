//! C4: auth-token store. Short-lived opaque tokens, optionally IP-bound,
//! TTL eviction.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;

const TOKEN_LEN: usize = 32;
const TOKEN_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct AuthTokenInfo {
    expires_at: Instant,
    bound_ip: Option<String>,
}

/// Process-wide, mutex-guarded (via `DashMap`'s internal sharded locks)
/// map of issued tokens to their metadata.
pub struct AuthTokenStore {
    tokens: DashMap<String, AuthTokenInfo>,
    ip_binding: bool,
    basic_auth_enabled: bool,
}

impl AuthTokenStore {
    pub fn new(basic_auth_enabled: bool, ip_binding: bool) -> Self {
        Self {
            tokens: DashMap::new(),
            ip_binding,
            basic_auth_enabled,
        }
    }

    /// Issue a fresh opaque token for `ip`. Tokens never collide: on a
    /// collision (vanishingly unlikely at 32 chars) we simply redraw.
    pub fn issue(&self, ip: &str) -> String {
        self.prune();
        loop {
            let candidate = Self::random_token();
            // `entry` gives us an atomic check-and-insert so two concurrent
            // issuances can never observe the same candidate as free.
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.tokens.entry(candidate.clone())
            {
                slot.insert(AuthTokenInfo {
                    expires_at: Instant::now() + TOKEN_TTL,
                    bound_ip: self.ip_binding.then(|| ip.to_string()),
                });
                return candidate;
            }
        }
    }

    /// Validate a token presented by a client at `ip`. When basic-auth is
    /// disabled validation always succeeds.
    pub fn validate(&self, token: &str, ip: &str) -> bool {
        if !self.basic_auth_enabled {
            return true;
        }
        self.prune();
        match self.tokens.get(token) {
            None => false,
            Some(info) => {
                if info.expires_at <= Instant::now() {
                    return false;
                }
                match &info.bound_ip {
                    Some(bound) => bound == ip,
                    None => true,
                }
            }
        }
    }

    /// Lazily prune expired entries. O(n) in the number of live tokens,
    /// which is bounded by active clients × TTL.
    fn prune(&self) {
        let now = Instant::now();
        self.tokens.retain(|_, info| info.expires_at > now);
    }

    fn random_token() -> String {
        let mut rng = rand::thread_rng();
        (0..TOKEN_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..TOKEN_ALPHABET.len());
                TOKEN_ALPHABET[idx] as char
            })
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn issued_tokens_are_unique_and_correct_length() {
        let store = AuthTokenStore::new(true, false);
        let mut seen = HashSet::new();
        for _ in 0..2000 {
            let token = store.issue("1.2.3.4");
            assert_eq!(token.len(), TOKEN_LEN);
            assert!(seen.insert(token));
        }
    }

    #[test]
    fn validate_accepts_freshly_issued_token() {
        let store = AuthTokenStore::new(true, false);
        let token = store.issue("1.2.3.4");
        assert!(store.validate(&token, "1.2.3.4"));
        assert!(!store.validate("not-a-real-token", "1.2.3.4"));
    }

    #[test]
    fn ip_binding_rejects_mismatched_ip() {
        let store = AuthTokenStore::new(true, true);
        let token = store.issue("1.2.3.4");
        assert!(store.validate(&token, "1.2.3.4"));
        assert!(!store.validate(&token, "5.6.7.8"));
    }

    #[test]
    fn disabled_basic_auth_always_validates() {
        let store = AuthTokenStore::new(false, false);
        assert!(store.validate("anything", "1.2.3.4"));
        assert!(store.validate("", "1.2.3.4"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let store = AuthTokenStore::new(true, false);
        let token = token_with_past_expiry(&store, "1.2.3.4");
        assert!(!store.validate(&token, "1.2.3.4"));
    }

    /// Test helper: insert a token that's already expired so we can assert
    /// pruning/rejection without waiting an hour.
    fn token_with_past_expiry(store: &AuthTokenStore, ip: &str) -> String {
        let token = AuthTokenStore::random_token();
        store.tokens.insert(
            token.clone(),
            AuthTokenInfo {
                expires_at: Instant::now() - Duration::from_secs(1),
                bound_ip: store.ip_binding.then(|| ip.to_string()),
            },
        );
        token
    }
}
