//! Image-transformation external service client (§6, §4.8 step 5).
//!
//! The service is reached over HTTP: a submit call returns either an immediate image URL or
//! a job id to poll; this module hides that distinction behind a single `run` call that
//! returns raw image bytes or a [`EngineError::TransformFailure`].

use std::time::{Duration, Instant};

use crybb_bot_core::config::Secret;
use crybb_bot_core::errors::EngineError;

#[derive(serde::Serialize)]
struct SubmitRequest<'a> {
    input_images: [&'a str; 2],
    prompt: &'a str,
}

#[derive(serde::Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    job_id: Option<String>,
}

#[derive(serde::Deserialize)]
struct PollResponse {
    status: String,
    #[serde(default)]
    image_url: Option<String>,
}

const PROMPT: &str = "crybb style transfer";

/// Submits `[style_url, target_url]` to the transform service and waits (submitting,
/// polling, or both, depending on the service's response) for the resulting image bytes,
/// up to `timeout` total.
pub(crate) async fn run(
    http: &reqwest::Client,
    base_url: &str,
    token: &Secret,
    style_url: &str,
    target_url: &str,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<Vec<u8>, EngineError> {
    let deadline = Instant::now() + timeout;

    let submit: SubmitResponse = http
        .post(format!("{base_url}/transform"))
        .bearer_auth(token.expose())
        .json(&SubmitRequest {
            input_images: [style_url, target_url],
            prompt: PROMPT,
        })
        .send()
        .await
        .map_err(EngineError::from)?
        .error_for_status()
        .map_err(EngineError::from)?
        .json()
        .await
        .map_err(|err| EngineError::TransformFailure(err.to_string()))?;

    let image_url = if let Some(url) = submit.image_url {
        url
    } else if let Some(job_id) = submit.job_id {
        poll_until_ready(http, base_url, token, &job_id, poll_interval, deadline).await?
    } else {
        return Err(EngineError::TransformFailure(
            "transform service returned neither image_url nor job_id".to_string(),
        ));
    };

    download(http, &image_url).await
}

async fn poll_until_ready(
    http: &reqwest::Client,
    base_url: &str,
    token: &Secret,
    job_id: &str,
    poll_interval: Duration,
    deadline: Instant,
) -> Result<String, EngineError> {
    loop {
        if Instant::now() >= deadline {
            return Err(EngineError::TransformFailure(format!(
                "job {job_id} did not complete before the timeout"
            )));
        }

        let poll: PollResponse = http
            .get(format!("{base_url}/transform/{job_id}"))
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(EngineError::from)?
            .error_for_status()
            .map_err(EngineError::from)?
            .json()
            .await
            .map_err(|err| EngineError::TransformFailure(err.to_string()))?;

        match poll.status.as_str() {
            "completed" => {
                return poll.image_url.ok_or_else(|| {
                    EngineError::TransformFailure(format!("job {job_id} completed with no image_url"))
                });
            }
            "failed" => {
                return Err(EngineError::TransformFailure(format!("job {job_id} failed")));
            }
            _ => {
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

async fn download(http: &reqwest::Client, image_url: &str) -> Result<Vec<u8>, EngineError> {
    let bytes = http
        .get(image_url)
        .send()
        .await
        .map_err(EngineError::from)?
        .error_for_status()
        .map_err(EngineError::from)?
        .bytes()
        .await
        .map_err(|err| EngineError::TransformFailure(err.to_string()))?;
    Ok(bytes.to_vec())
}

/// The placeholder image pipeline: delegates to a static renderer that is out of scope for
/// this crate. Always fails so the caller falls back to a text-only reply.
pub(crate) async fn run_placeholder() -> Result<Vec<u8>, EngineError> {
    Err(EngineError::TransformFailure(
        "placeholder image pipeline delegates to an out-of-scope renderer".to_string(),
    ))
}

/// Runs `run` up to `max_attempts` times, retrying on any [`EngineError`] that isn't itself
/// a terminal transform failure signal (i.e. everything — the pipeline treats exhaustion of
/// all attempts as the only terminal condition, per §4.8 step 5).
pub(crate) async fn run_with_retries(
    http: &reqwest::Client,
    base_url: &str,
    token: &Secret,
    style_url: &str,
    target_url: &str,
    poll_interval: Duration,
    timeout: Duration,
    max_attempts: u32,
) -> Result<Vec<u8>, EngineError> {
    let mut last_err = None;
    for attempt in 1..=max_attempts.max(1) {
        match run(http, base_url, token, style_url, target_url, poll_interval, timeout).await {
            Ok(bytes) => return Ok(bytes),
            Err(err) => {
                tracing::warn!(attempt, max_attempts, error = %err, "transform attempt failed");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| EngineError::TransformFailure("no attempts made".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_response_with_neither_field_is_a_transform_failure() {
        let body: SubmitResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(body.image_url.is_none());
        assert!(body.job_id.is_none());
    }

    #[tokio::test]
    async fn run_with_retries_gives_up_after_max_attempts() {
        let http = reqwest::Client::new();
        let token = Secret::from("tok".to_string());
        let err = run_with_retries(
            &http,
            "http://127.0.0.1:0",
            &token,
            "https://x.example.com/style.jpg",
            "https://x.example.com/target.jpg",
            Duration::from_millis(1),
            Duration::from_millis(50),
            2,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::TransientNetwork(_)));
    }

    #[tokio::test]
    async fn placeholder_pipeline_always_fails_so_the_caller_falls_back() {
        let err = run_placeholder().await.unwrap_err();
        assert!(matches!(err, EngineError::TransformFailure(_)));
    }
}
