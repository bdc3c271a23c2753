//! Public API types for the in-process mention-responder engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crybb_bot_core::config::{Cli, ImagePipeline, Secret};

use crate::http::OAuth1Credentials;

/// Configuration for the in-process engine, derived from the parsed CLI/env [`Cli`].
#[derive(Clone)]
pub struct EngineConfig {
    /// Bot's own handle, without leading `@`.
    pub bot_handle: String,
    /// App bearer token (read endpoints).
    pub bearer_token: Secret,
    /// OAuth1 credentials (write endpoints).
    pub oauth: OAuth1Credentials,
    /// Bearer token for the image-transformation service.
    pub transform_service_token: Secret,
    /// Base URL of the image-transformation service.
    pub transform_service_url: String,
    /// Style reference image URL.
    pub style_image_url: String,
    /// Base URL for the microblog API v2 surface.
    pub api_v2_base: String,
    /// Base URL for the microblog API v1.1 surface.
    pub api_v1_base: String,
    /// Directory holding the processed-id ledger and high-watermark files.
    pub outbox_dir: std::path::PathBuf,
    /// Which image pipeline the reply pipeline invokes.
    pub image_pipeline: ImagePipeline,
    /// Fallback poll interval.
    pub poll_seconds: Duration,
    /// Awake-cadence sleep bounds.
    pub awake_min_secs: Duration,
    /// Awake-cadence sleep bounds.
    pub awake_max_secs: Duration,
    /// Quiet-cadence sleep bounds.
    pub sleeper_min_secs: Duration,
    /// Quiet-cadence sleep bounds.
    pub sleeper_max_secs: Duration,
    /// Hourly cap on incoming mentions accepted per author.
    pub per_author_hourly_limit: u32,
    /// Hourly cap on replies sent per target.
    pub per_target_hourly_limit: u32,
    /// Max reply pipelines executing concurrently.
    pub ai_max_concurrency: usize,
    /// Max attempts against the transform service per mention.
    pub ai_max_attempts: u32,
    /// Overall timeout waiting on the transform service.
    pub ai_timeout: Duration,
    /// Poll interval while waiting on an async transform job.
    pub ai_poll_interval: Duration,
    /// Like-count threshold for the quiet-period re-post activity.
    pub rt_like_threshold: u64,
    /// Handles exempt from the incoming rate limiter.
    pub whitelist_handles: Vec<String>,
}

impl EngineConfig {
    /// Default awake-cadence minimum, mirrored from [`crybb_bot_core::config::Cli`]'s own
    /// default so callers constructing a config by hand (e.g. tests) don't need to restate it.
    pub const DEFAULT_AWAKE_MIN_SECS: Duration = Duration::from_secs(180);
}

impl From<Cli> for EngineConfig {
    fn from(cli: Cli) -> Self {
        let oauth = OAuth1Credentials {
            consumer_key: cli.user_api_key,
            consumer_secret: cli.user_api_secret,
            access_token: cli.user_access_token,
            access_token_secret: cli.user_access_token_secret,
        };
        Self {
            bot_handle: cli.bot_handle,
            bearer_token: cli.bearer_token,
            oauth,
            transform_service_token: cli.transform_service_token,
            transform_service_url: cli.transform_service_url,
            style_image_url: cli.style_image_url,
            api_v2_base: cli.api_v2_base,
            api_v1_base: cli.api_v1_base,
            outbox_dir: cli.outbox_dir,
            image_pipeline: cli.image_pipeline,
            poll_seconds: cli.poll_seconds,
            awake_min_secs: cli.awake_min_secs,
            awake_max_secs: cli.awake_max_secs,
            sleeper_min_secs: cli.sleeper_min_secs,
            sleeper_max_secs: cli.sleeper_max_secs,
            per_author_hourly_limit: cli.per_author_hourly_limit,
            per_target_hourly_limit: cli.per_target_hourly_limit,
            ai_max_concurrency: cli.ai_max_concurrency,
            ai_max_attempts: cli.ai_max_attempts,
            ai_timeout: cli.ai_timeout,
            ai_poll_interval: cli.ai_poll_interval,
            rt_like_threshold: cli.rt_like_threshold,
            whitelist_handles: cli.whitelist_handles,
        }
    }
}

/// Outcome of processing a single mention through the reply pipeline, for event/log purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MentionOutcome {
    /// An image reply was posted.
    Replied,
    /// A text-only fallback reply was posted after the transform step failed.
    TextFallback,
    /// Skipped because the incoming limiter rejected it; left for retry.
    RateLimitedIn,
    /// Marked processed because the outgoing limiter rejected it (terminal).
    RateLimitedOut,
    /// Marked processed because the target user could not be resolved.
    SkipAbsentTarget,
    /// Left unprocessed after a terminal post/upload failure.
    PostFailed,
}

/// Engine event stream payload, broadcast to any subscriber (e.g. a future health server).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Engine started.
    Started,
    /// Engine is stopping (graceful shutdown requested).
    StopRequested,
    /// A batch of mentions was fetched.
    BatchFetched {
        /// Number of mentions in the batch.
        count: usize,
    },
    /// A mention reached a terminal outcome.
    MentionFinished {
        /// Mention id.
        mention_id: String,
        /// Outcome.
        outcome: MentionOutcome,
    },
    /// A non-fatal warning.
    Warning {
        /// Warning message.
        message: String,
    },
    /// A non-fatal error.
    Error {
        /// Error message.
        message: String,
    },
    /// Engine stopped (scheduler loop exited).
    Stopped,
}

/// Point-in-time snapshot of engine-wide observability counters (§10), handed to an external
/// health/metrics surface.
pub type StatusSnapshot = crybb_bot_core::counters::CountersSnapshot;

/// Handle to a running engine instance.
pub struct EngineHandle {
    pub(crate) inner: std::sync::Arc<crate::engine::EngineInner>,
    pub(crate) join: tokio::task::JoinHandle<anyhow::Result<()>>,
}

/// Start a new in-process engine instance.
pub fn start_engine(
    config: EngineConfig,
    counters: std::sync::Arc<crybb_bot_core::counters::Counters>,
) -> EngineHandle {
    crate::engine::start_engine(config, counters)
}

impl EngineHandle {
    /// Subscribe to the engine event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Request a graceful shutdown: finish in-flight reply pipelines, then stop.
    pub fn request_stop(&self) {
        self.inner.request_stop();
    }

    /// Wait for the engine to stop, returning the engine task's result.
    pub async fn wait(self) -> anyhow::Result<()> {
        match self.join.await {
            Ok(res) => res,
            Err(err) => Err(anyhow::anyhow!("engine task join error: {err}")),
        }
    }
}
