//! Process configuration: a single `clap::Parser` struct populated from CLI flags or
//! environment variables, following the pattern the source repository's
//! `crates/client/src/cli.rs` uses (`#[arg(long, env = "…", default_value_t = …)]` per field).

use std::fmt;

use clap::Parser;

/// A secret value that never prints its contents via `Debug`/`Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Expose the underlying value. Callers should only do this at the point of use
    /// (e.g. building an `Authorization` header), never to log or print it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::str::FromStr for Secret {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Which image pipeline the reply pipeline should invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ImagePipeline {
    /// Call the external image-transformation service.
    Ai,
    /// Render a static placeholder instead (external collaborator; referenced by contract only).
    Placeholder,
}

fn parse_duration_secs(input: &str) -> Result<std::time::Duration, String> {
    let secs: u64 = input
        .trim()
        .parse()
        .map_err(|_| format!("invalid seconds value: {input:?}"))?;
    Ok(std::time::Duration::from_secs(secs))
}

fn parse_whitelist(input: &str) -> Result<Vec<String>, std::convert::Infallible> {
    Ok(input
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect())
}

/// CLI/env configuration for the `crybb-bot` worker.
#[derive(Debug, Clone, Parser)]
#[command(name = "crybb-bot", version, about = "Mention-responder polling worker")]
pub struct Cli {
    /// Bot's own handle (without leading `@`), used to locate mention targets.
    #[arg(long, env = "BOT_HANDLE")]
    pub bot_handle: String,

    /// OAuth2 app bearer token, used for read endpoints.
    #[arg(long, env = "BEARER_TOKEN")]
    pub bearer_token: Secret,

    /// OAuth1 consumer key, used to sign user-context write requests.
    #[arg(long, env = "USER_API_KEY")]
    pub user_api_key: Secret,

    /// OAuth1 consumer secret.
    #[arg(long, env = "USER_API_SECRET")]
    pub user_api_secret: Secret,

    /// OAuth1 access token.
    #[arg(long, env = "USER_ACCESS_TOKEN")]
    pub user_access_token: Secret,

    /// OAuth1 access token secret.
    #[arg(long, env = "USER_ACCESS_TOKEN_SECRET")]
    pub user_access_token_secret: Secret,

    /// Bearer token for the image-transformation service.
    #[arg(long, env = "TRANSFORM_SERVICE_TOKEN")]
    pub transform_service_token: Secret,

    /// Base URL of the image-transformation service.
    #[arg(long, env = "TRANSFORM_SERVICE_URL")]
    pub transform_service_url: String,

    /// Style reference image URL passed to the transform service on every job.
    #[arg(long, env = "STYLE_IMAGE_URL")]
    pub style_image_url: String,

    /// Base URL for the microblog API's v2 surface.
    #[arg(
        long,
        env = "MICROBLOG_API_V2_BASE",
        default_value = "https://api.twitter.com/2"
    )]
    pub api_v2_base: String,

    /// Base URL for the microblog API's v1.1 surface (media upload, retweet).
    #[arg(
        long,
        env = "MICROBLOG_API_V1_BASE",
        default_value = "https://api.twitter.com/1.1"
    )]
    pub api_v1_base: String,

    /// Directory holding `processed_ids.json` and `since_id.json`.
    #[arg(long, env = "OUTBOX_DIR", default_value = "./outbox")]
    pub outbox_dir: std::path::PathBuf,

    /// Which image pipeline to invoke from the reply pipeline.
    #[arg(long, env = "IMAGE_PIPELINE", value_enum, default_value_t = ImagePipeline::Ai)]
    pub image_pipeline: ImagePipeline,

    /// Fallback poll interval when neither awake nor quiet cadence applies.
    #[arg(long, env = "POLL_SECONDS", value_parser = parse_duration_secs, default_value = "200")]
    pub poll_seconds: std::time::Duration,

    /// Awake-cadence minimum sleep between iterations.
    #[arg(long, env = "AWAKE_MIN_SECS", value_parser = parse_duration_secs, default_value = "180")]
    pub awake_min_secs: std::time::Duration,

    /// Awake-cadence maximum sleep between iterations.
    #[arg(long, env = "AWAKE_MAX_SECS", value_parser = parse_duration_secs, default_value = "300")]
    pub awake_max_secs: std::time::Duration,

    /// Quiet-cadence minimum sleep between iterations.
    #[arg(long, env = "SLEEPER_MIN_SECS", value_parser = parse_duration_secs, default_value = "480")]
    pub sleeper_min_secs: std::time::Duration,

    /// Quiet-cadence maximum sleep between iterations.
    #[arg(long, env = "SLEEPER_MAX_SECS", value_parser = parse_duration_secs, default_value = "600")]
    pub sleeper_max_secs: std::time::Duration,

    /// Hourly cap on incoming mentions accepted per author.
    #[arg(long, env = "PER_AUTHOR_HOURLY_LIMIT", default_value_t = 12)]
    pub per_author_hourly_limit: u32,

    /// Hourly cap on replies sent per target.
    #[arg(long, env = "PER_TARGET_HOURLY_LIMIT", default_value_t = 5)]
    pub per_target_hourly_limit: u32,

    /// Max number of reply pipelines executing concurrently.
    #[arg(long, env = "AI_MAX_CONCURRENCY", default_value_t = 2)]
    pub ai_max_concurrency: usize,

    /// Max number of attempts against the transform service per mention.
    #[arg(long, env = "AI_MAX_ATTEMPTS", default_value_t = 2)]
    pub ai_max_attempts: u32,

    /// Overall timeout waiting on the transform service.
    #[arg(long, env = "AI_TIMEOUT", value_parser = parse_duration_secs, default_value = "120")]
    pub ai_timeout: std::time::Duration,

    /// Poll interval while waiting on an async transform job.
    #[arg(long, env = "AI_POLL_INTERVAL", value_parser = parse_duration_secs, default_value = "2")]
    pub ai_poll_interval: std::time::Duration,

    /// Like-count threshold for the quiet-period re-post activity.
    #[arg(long, env = "RT_LIKE_THRESHOLD", default_value_t = 10)]
    pub rt_like_threshold: u64,

    /// Comma-separated handles exempt from the incoming rate limiter.
    #[arg(long, env = "WHITELIST_HANDLES", value_parser = parse_whitelist, default_value = "")]
    pub whitelist_handles: Vec<String>,
}

/// Alias kept for call sites that want the "configuration" name rather than "CLI".
pub type Config = Cli;
