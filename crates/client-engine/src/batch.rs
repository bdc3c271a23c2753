//! Per-batch user snapshot and resolution (§4.3).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::Method;

use crybb_bot_core::config::Secret;
use crybb_bot_core::errors::EngineError;

use crate::http::{Credential, MicroblogClient};
use crate::model::User;

const TTL_CACHE_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// Immutable per-poll map of `username_lowercase -> User`, built from a mentions response's
/// expansions block.
#[derive(Debug, Clone, Default)]
pub struct BatchSnapshot {
    by_username: HashMap<String, User>,
}

impl BatchSnapshot {
    /// Build a snapshot from the expansions block of a mentions response.
    pub fn from_users(users: Vec<User>) -> Self {
        let by_username = users
            .into_iter()
            .map(|user| (user.username_key(), user))
            .collect();
        Self { by_username }
    }

    fn get(&self, username_lower: &str) -> Option<&User> {
        self.by_username.get(username_lower)
    }
}

struct TtlEntry {
    user: User,
    inserted_at: Instant,
}

/// Process-wide cache of resolved users with a 5-minute TTL, shared across batches.
#[derive(Default)]
pub struct UserTtlCache {
    entries: Mutex<HashMap<String, TtlEntry>>,
}

impl UserTtlCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, username_lower: &str, now: Instant) -> Option<User> {
        let mut entries = self.entries.lock().expect("user TTL cache poisoned");
        match entries.get(username_lower) {
            Some(entry) if now.duration_since(entry.inserted_at) < TTL_CACHE_LIFETIME => {
                Some(entry.user.clone())
            }
            Some(_) => {
                entries.remove(username_lower);
                None
            }
            None => None,
        }
    }

    fn insert(&self, user: User, now: Instant) {
        let mut entries = self.entries.lock().expect("user TTL cache poisoned");
        entries.insert(
            user.username_key(),
            TtlEntry {
                user,
                inserted_at: now,
            },
        );
    }
}

/// A user lookup either came from local state (no network call) or required a call to the
/// user-by-username endpoint.
#[derive(Debug, Clone)]
pub enum ResolvedUser {
    /// Target user found.
    Found(User),
    /// The endpoint reported the user as missing or suspended (§4.3 step 5).
    Absent,
}

/// Holds one batch's immutable snapshot plus the overlay of users pinned during this batch,
/// and a reference to the long-lived TTL cache.
pub struct BatchContext<'a> {
    snapshot: BatchSnapshot,
    overlay: Mutex<HashMap<String, User>>,
    ttl_cache: &'a UserTtlCache,
}

impl<'a> BatchContext<'a> {
    /// Build a batch context over `snapshot`, backed by the shared `ttl_cache`.
    pub fn new(snapshot: BatchSnapshot, ttl_cache: &'a UserTtlCache) -> Self {
        Self {
            snapshot,
            overlay: Mutex::new(HashMap::new()),
            ttl_cache,
        }
    }

    /// Resolve `username` in order: batch snapshot, overlay, TTL cache, then a network call
    /// to the user-by-username endpoint (§4.3).
    pub async fn resolve_user(
        &self,
        client: &MicroblogClient,
        bearer: &Secret,
        api_v2_base: &str,
        username: &str,
    ) -> Result<ResolvedUser, EngineError> {
        let key = username.to_ascii_lowercase();

        if let Some(user) = self.snapshot.get(&key) {
            return Ok(ResolvedUser::Found(user.clone()));
        }
        if let Some(user) = self.overlay.lock().expect("batch overlay poisoned").get(&key) {
            return Ok(ResolvedUser::Found(user.clone()));
        }
        if let Some(user) = self.ttl_cache.get(&key, Instant::now()) {
            return Ok(ResolvedUser::Found(user));
        }

        let url = format!("{api_v2_base}/users/by/username/{username}");
        let outcome = client
            .call(
                "users/by/username",
                Method::GET,
                &url,
                Credential::Bearer(bearer),
                &[],
                crate::http::RequestBody::None,
            )
            .await;

        let response = match outcome {
            Ok(crate::http::CallOutcome::Success(response)) => response,
            // Transient: the client already slept until reset + 5s. Propagate so the caller
            // retries the mention on a later batch rather than treating it as resolved-absent.
            Ok(crate::http::CallOutcome::RateLimited) => {
                return Err(EngineError::RateLimited { retry_after_secs: 0 })
            }
            // 404 (not found) and 403 (suspended/invalid) are the two markers the endpoint
            // uses for "this user does not exist for our purposes" (§4.3 step 5).
            Err(EngineError::ClientError {
                status: 404 | 403, ..
            }) => return Ok(ResolvedUser::Absent),
            Err(err) => return Err(err),
        };

        #[derive(serde::Deserialize)]
        struct UserByUsernameResponse {
            data: Option<UserDto>,
        }
        #[derive(serde::Deserialize)]
        struct UserDto {
            id: String,
            username: String,
            name: String,
            profile_image_url: String,
        }

        let parsed: UserByUsernameResponse = response
            .json()
            .await
            .map_err(|err| EngineError::ClientError {
                status: 502,
                body: err.to_string(),
            })?;

        let Some(dto) = parsed.data else {
            return Ok(ResolvedUser::Absent);
        };

        let user = User {
            id: dto.id,
            username: dto.username,
            display_name: dto.name,
            profile_image_url: dto.profile_image_url,
        };

        self.overlay
            .lock()
            .expect("batch overlay poisoned")
            .insert(key, user.clone());
        self.ttl_cache.insert(user.clone(), Instant::now());

        Ok(ResolvedUser::Found(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(username: &str) -> User {
        User {
            id: format!("id-{username}"),
            username: username.to_string(),
            display_name: username.to_string(),
            profile_image_url: format!("https://x.example.com/{username}_normal.jpg"),
        }
    }

    #[test]
    fn snapshot_lookup_is_case_insensitive() {
        let snapshot = BatchSnapshot::from_users(vec![user("Alice")]);
        assert!(snapshot.get("alice").is_some());
    }

    #[test]
    fn ttl_cache_expires_entries() {
        let cache = UserTtlCache::new();
        let t0 = Instant::now();
        cache.insert(user("alice"), t0);
        assert!(cache.get("alice", t0).is_some());
        assert!(cache
            .get("alice", t0 + Duration::from_secs(301))
            .is_none());
    }

    /// A bare-bones HTTP/1.1 server, mirroring `http.rs`'s test helper: one queued
    /// status/body response per accepted connection.
    async fn mock_server(responses: Vec<(u16, &'static str)>) -> std::net::SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let mut total = Vec::new();
                loop {
                    let n = stream.read(&mut buf).await.unwrap();
                    total.extend_from_slice(&buf[..n]);
                    if n == 0 || total.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 {status} status\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn a_404_response_resolves_to_absent() {
        let addr = mock_server(vec![(404, r#"{"errors":[]}"#)]).await;
        let client = MicroblogClient::new().unwrap();
        let bearer = Secret::from("tok".to_string());
        let ttl_cache = UserTtlCache::new();
        let ctx = BatchContext::new(BatchSnapshot::default(), &ttl_cache);

        let resolved = ctx
            .resolve_user(&client, &bearer, &format!("http://{addr}"), "ghost")
            .await
            .unwrap();
        assert!(matches!(resolved, ResolvedUser::Absent));
    }

    #[tokio::test]
    async fn a_403_response_resolves_to_absent() {
        let addr = mock_server(vec![(403, r#"{"errors":[]}"#)]).await;
        let client = MicroblogClient::new().unwrap();
        let bearer = Secret::from("tok".to_string());
        let ttl_cache = UserTtlCache::new();
        let ctx = BatchContext::new(BatchSnapshot::default(), &ttl_cache);

        let resolved = ctx
            .resolve_user(&client, &bearer, &format!("http://{addr}"), "suspended")
            .await
            .unwrap();
        assert!(matches!(resolved, ResolvedUser::Absent));
    }

    #[tokio::test]
    async fn a_rate_limited_response_propagates_for_retry_rather_than_absent() {
        let addr = mock_server(vec![(429, r#"{"errors":[]}"#)]).await;
        let client = MicroblogClient::new().unwrap();
        let bearer = Secret::from("tok".to_string());
        let ttl_cache = UserTtlCache::new();
        let ctx = BatchContext::new(BatchSnapshot::default(), &ttl_cache);

        let err = ctx
            .resolve_user(&client, &bearer, &format!("http://{addr}"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RateLimited { .. }));
    }
}
