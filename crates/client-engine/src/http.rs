//! Microblog API client (§4.2): credential classes, OAuth1 request signing, and the
//! retry/backoff/rate-limit contract every call goes through.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::{Method, Response, StatusCode};
use sha1::Sha1;

use crybb_bot_core::config::Secret;

use crate::ratelimit::RateLimitRegistry;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 500;
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth1 consumer/token quadruple used to sign user-context (write) requests.
#[derive(Clone)]
pub struct OAuth1Credentials {
    /// Consumer (app) key.
    pub consumer_key: Secret,
    /// Consumer (app) secret.
    pub consumer_secret: Secret,
    /// Per-user access token.
    pub access_token: Secret,
    /// Per-user access token secret.
    pub access_token_secret: Secret,
}

/// Which credential class to attach to a request (§4.2).
pub enum Credential<'a> {
    /// App bearer token, used for read endpoints.
    Bearer(&'a Secret),
    /// Signed OAuth1, used for write endpoints.
    UserContext(&'a OAuth1Credentials),
}

/// Outcome of a single [`MicroblogClient::call`].
pub enum CallOutcome {
    /// The request succeeded (2xx); the response is returned for the caller to parse.
    Success(Response),
    /// HTTP 429 was observed; the client already slept until `reset + 5s`. The caller should
    /// decide whether to retry once more.
    RateLimited,
}

/// Request body shapes [`MicroblogClient::call`] knows how to attach. Rebuilt fresh on every
/// retry attempt, since [`reqwest::multipart::Form`] isn't `Clone`.
pub enum RequestBody<'a> {
    /// No body (GET-shaped requests).
    None,
    /// A JSON body, serialized on every attempt.
    Json(&'a serde_json::Value),
    /// A single-part multipart upload, e.g. media bytes.
    MultipartBytes {
        /// Form field name.
        field_name: &'static str,
        /// Suggested filename for the part.
        file_name: &'static str,
        /// Raw bytes of the part.
        bytes: &'a [u8],
    },
}

/// Wraps [`reqwest::Client`] with the credential attachment, retry, and rate-limit-registry
/// bookkeeping every microblog API call must go through.
pub struct MicroblogClient {
    http: reqwest::Client,
    registry: RateLimitRegistry,
}

impl MicroblogClient {
    /// Build a client with the standard per-call timeout.
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?;
        Ok(Self {
            http,
            registry: RateLimitRegistry::new(),
        })
    }

    /// Read-only access to the shared rate-limit registry, e.g. for `maybeSleep` checks made
    /// by the scheduler ahead of the mentions call.
    pub fn registry(&self) -> &RateLimitRegistry {
        &self.registry
    }

    /// Raw `reqwest` client, for endpoint wrappers (e.g. multipart media upload) that need
    /// request shapes `call` doesn't support. Callers are still responsible for updating the
    /// rate-limit registry from the response.
    pub(crate) fn raw(&self) -> &reqwest::Client {
        &self.http
    }

    /// Blocks until `endpoint`'s registry entry allows another call, per `maybeSleep` (§4.2).
    pub async fn maybe_sleep(&self, endpoint: &str, min_remaining: u32) {
        if let Some(wait) = self.registry.sleep_until_safe(endpoint, min_remaining) {
            tracing::info!(endpoint, wait_secs = wait.as_secs(), "rate limit floor reached, sleeping");
            tokio::time::sleep(wait).await;
        }
    }

    /// Perform one logical call against `endpoint`, retrying 5xx/network errors up to
    /// [`MAX_ATTEMPTS`] with exponential backoff, and handling 429 by sleeping until
    /// `reset + 5s` and returning [`CallOutcome::RateLimited`] without retrying internally.
    pub async fn call(
        &self,
        endpoint: &str,
        method: Method,
        url: &str,
        credential: Credential<'_>,
        query: &[(&str, &str)],
        body: RequestBody<'_>,
    ) -> Result<CallOutcome, crybb_bot_core::errors::EngineError> {
        self.maybe_sleep(endpoint, 2).await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut req = self.http.request(method.clone(), url).query(query);
            req = match &credential {
                Credential::Bearer(token) => req.bearer_auth(token.expose()),
                Credential::UserContext(creds) => {
                    let header = oauth1_authorization_header(method.as_str(), url, query, creds);
                    req.header("Authorization", header)
                }
            };
            req = match &body {
                RequestBody::None => req,
                RequestBody::Json(value) => req.json(value),
                RequestBody::MultipartBytes {
                    field_name,
                    file_name,
                    bytes,
                } => {
                    let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(*file_name);
                    let form = reqwest::multipart::Form::new().part(*field_name, part);
                    req.multipart(form)
                }
            };

            let send_result = req.send().await;

            let response = match send_result {
                Ok(response) => response,
                Err(err) => {
                    if attempt >= MAX_ATTEMPTS || !(err.is_timeout() || err.is_connect()) {
                        return Err(err.into());
                    }
                    backoff_sleep(attempt).await;
                    continue;
                }
            };

            observe_rate_limit_headers(&self.registry, endpoint, &response);

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let reset = reset_header(&response).unwrap_or(0);
                let wait = reset_wait(reset);
                tracing::warn!(endpoint, wait_secs = wait.as_secs(), "rate limited (429)");
                tokio::time::sleep(wait).await;
                return Ok(CallOutcome::RateLimited);
            }
            if status.is_server_error() {
                if attempt >= MAX_ATTEMPTS {
                    let body = response.text().await.unwrap_or_default();
                    return Err(crybb_bot_core::errors::EngineError::TransientNetwork(format!(
                        "http {status}: {body}"
                    )));
                }
                backoff_sleep(attempt).await;
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(crybb_bot_core::errors::EngineError::ClientError {
                    status: status.as_u16(),
                    body,
                });
            }

            return Ok(CallOutcome::Success(response));
        }
    }
}

async fn backoff_sleep(attempt: u32) {
    let base = BASE_BACKOFF_MS * 2u64.pow(attempt.saturating_sub(1));
    let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
    let millis = (base as f64 * (1.0 + jitter_frac)).max(0.0) as u64;
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

pub(crate) fn observe_rate_limit_headers(registry: &RateLimitRegistry, endpoint: &str, response: &Response) {
    let headers = response.headers();
    let limit = header_u64(headers, "x-rate-limit-limit").unwrap_or(0) as u32;
    let remaining = header_u64(headers, "x-rate-limit-remaining").unwrap_or(0) as u32;
    let reset = header_u64(headers, "x-rate-limit-reset").unwrap_or(0);
    if headers.contains_key("x-rate-limit-remaining") {
        registry.observe(endpoint, limit, remaining, reset);
    }
}

fn reset_header(response: &Response) -> Option<u64> {
    header_u64(response.headers(), "x-rate-limit-reset")
}

pub(crate) fn reset_wait(reset_unix: u64) -> Duration {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Duration::from_secs((reset_unix + 5).saturating_sub(now))
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

type HmacSha1 = Hmac<Sha1>;

/// Builds the `Authorization: OAuth …` header for a user-context request, signing with
/// HMAC-SHA1 per the OAuth 1.0a signature base string algorithm.
pub(crate) fn oauth1_authorization_header(
    method: &str,
    url: &str,
    query: &[(&str, &str)],
    creds: &OAuth1Credentials,
) -> String {
    let nonce: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string();

    let mut oauth_params: BTreeMap<&str, String> = BTreeMap::new();
    oauth_params.insert("oauth_consumer_key", creds.consumer_key.expose().to_string());
    oauth_params.insert("oauth_nonce", nonce);
    oauth_params.insert("oauth_signature_method", "HMAC-SHA1".to_string());
    oauth_params.insert("oauth_timestamp", timestamp);
    oauth_params.insert("oauth_token", creds.access_token.expose().to_string());
    oauth_params.insert("oauth_version", "1.0".to_string());

    let mut all_params: BTreeMap<String, String> = query
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for (k, v) in &oauth_params {
        all_params.insert(k.to_string(), v.clone());
    }

    let param_string = all_params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(url),
        percent_encode(&param_string)
    );

    let signing_key = format!(
        "{}&{}",
        percent_encode(creds.consumer_secret.expose()),
        percent_encode(creds.access_token_secret.expose())
    );

    let mut mac =
        HmacSha1::new_from_slice(signing_key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(base_string.as_bytes());
    let signature = B64.encode(mac.finalize().into_bytes());

    let mut header_params = oauth_params;
    header_params.insert("oauth_signature", signature);

    let header_body = header_params
        .iter()
        .map(|(k, v)| format!(r#"{}="{}""#, k, percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");

    format!("OAuth {header_body}")
}

fn percent_encode(input: &str) -> String {
    const FRAGMENT: &percent_encoding::AsciiSet = &percent_encoding::NON_ALPHANUMERIC
        .remove(b'-')
        .remove(b'.')
        .remove(b'_')
        .remove(b'~');
    percent_encoding::utf8_percent_encode(input, FRAGMENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> OAuth1Credentials {
        OAuth1Credentials {
            consumer_key: Secret::from("ck".to_string()),
            consumer_secret: Secret::from("cs".to_string()),
            access_token: Secret::from("at".to_string()),
            access_token_secret: Secret::from("ats".to_string()),
        }
    }

    #[test]
    fn signed_header_carries_every_oauth_field() {
        let header = oauth1_authorization_header(
            "POST",
            "https://api.twitter.com/2/tweets",
            &[],
            &creds(),
        );
        assert!(header.starts_with("OAuth "));
        for field in [
            "oauth_consumer_key",
            "oauth_nonce",
            "oauth_signature",
            "oauth_signature_method",
            "oauth_timestamp",
            "oauth_token",
            "oauth_version",
        ] {
            assert!(header.contains(field), "missing {field} in {header}");
        }
    }

    #[test]
    fn signature_changes_with_query_params() {
        let without = oauth1_authorization_header("GET", "https://x.example.com/a", &[], &creds());
        let with = oauth1_authorization_header(
            "GET",
            "https://x.example.com/a",
            &[("id", "123")],
            &creds(),
        );
        assert_ne!(without, with);
    }

    #[test]
    fn reset_wait_floors_at_zero_for_past_reset() {
        assert_eq!(reset_wait(1), Duration::from_secs(0));
    }

    /// A bare-bones HTTP/1.1 server: accepts one connection per queued response, reads the
    /// request up to the end of headers, and writes back a fixed status/body.
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
    async fn call_retries_a_server_error_then_succeeds() {
        let addr = mock_server(vec![
            (500, r#"{"error":"boom"}"#),
            (200, r#"{"ok":true}"#),
        ])
        .await;
        let client = MicroblogClient::new().unwrap();
        let bearer = Secret::from("tok".to_string());
        let outcome = client
            .call(
                "users/mentions",
                Method::GET,
                &format!("http://{addr}/users/mentions"),
                Credential::Bearer(&bearer),
                &[],
                RequestBody::None,
            )
            .await
            .unwrap();
        let response = match outcome {
            CallOutcome::Success(response) => response,
            CallOutcome::RateLimited => panic!("expected success after retry"),
        };
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn call_fails_fast_on_a_client_error() {
        let addr = mock_server(vec![(404, r#"{"error":"not found"}"#)]).await;
        let client = MicroblogClient::new().unwrap();
        let bearer = Secret::from("tok".to_string());
        let err = match client
            .call(
                "users/mentions",
                Method::GET,
                &format!("http://{addr}/users/mentions"),
                Credential::Bearer(&bearer),
                &[],
                RequestBody::None,
            )
            .await
        {
            Ok(_) => panic!("expected a client error"),
            Err(err) => err,
        };
        assert!(matches!(
            err,
            crybb_bot_core::errors::EngineError::ClientError { status: 404, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn maybe_sleep_advances_virtual_time_by_the_registry_wait_without_real_delay() {
        let registry = RateLimitRegistry::new();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        registry.observe("users/mentions", 15, 0, now + 5);

        let client = MicroblogClient {
            http: reqwest::Client::new(),
            registry,
        };
        let expected = client
            .registry()
            .sleep_until_safe("users/mentions", 2)
            .expect("remaining is below the floor, a wait is expected");

        let start = tokio::time::Instant::now();
        client.maybe_sleep("users/mentions", 2).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= expected);
        assert!(elapsed < expected + Duration::from_secs(1));
    }
}
