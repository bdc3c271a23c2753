//! Per-mention reply pipeline (§4.8).

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::Semaphore;

use crybb_bot_core::config::ImagePipeline;
use crybb_bot_core::counters::Counters;
use crybb_bot_core::errors::EngineError;
use crybb_bot_core::ledger::ProcessedLedger;

use crate::api::{EngineConfig, MentionOutcome};
use crate::batch::{BatchContext, ResolvedUser};
use crate::endpoints;
use crate::http::MicroblogClient;
use crate::limiter::SlidingWindowLimiter;
use crate::model::Mention;
use crate::pfp::normalize_profile_image_url;
use crate::target::extract_target;
use crate::transform;

const REPLY_BODY_TEMPLATE: &str =
    "Welcome to $CRYBB @{target} 🍼\n\nNO CRYING IN THE CASINO.";
const FALLBACK_BODY: &str = "Sorry — I couldn't render that one. Try again in a bit! 💛";

/// Shared, cross-batch state the reply pipeline needs beyond one mention and one batch
/// context: the two rate limiters and the concurrency-limiting semaphore (§4.6, §5).
pub struct PipelineShared {
    incoming: AsyncMutex<SlidingWindowLimiter>,
    outgoing: AsyncMutex<SlidingWindowLimiter>,
    slots: Semaphore,
}

impl PipelineShared {
    /// Build shared limiter/semaphore state from engine configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            incoming: AsyncMutex::new(SlidingWindowLimiter::new(config.per_author_hourly_limit)),
            outgoing: AsyncMutex::new(SlidingWindowLimiter::new(config.per_target_hourly_limit)),
            slots: Semaphore::new(config.ai_max_concurrency.max(1)),
        }
    }
}

/// Processes one mention end-to-end, mutating `ledger` and `counters` as it reaches a
/// terminal outcome. Returns `None` when the mention is left for retry by a later batch
/// (incoming-limiter rejection, or a terminal post failure).
pub async fn process_mention(
    mention: &Mention,
    batch: &BatchContext<'_>,
    shared: &PipelineShared,
    client: &MicroblogClient,
    config: &EngineConfig,
    ledger: &AsyncMutex<ProcessedLedger>,
    counters: &Arc<Counters>,
) -> Result<Option<MentionOutcome>, EngineError> {
    let author_handle = mention.author_username.clone();
    let whitelisted = config
        .whitelist_handles
        .iter()
        .any(|h| h == &author_handle.to_ascii_lowercase());

    if !whitelisted {
        let mut incoming = shared.incoming.lock().await;
        if !incoming.allow(&mention.author_id, Instant::now()) {
            counters.record_rate_limited_in();
            return Ok(None);
        }
    }

    let target_username = extract_target(mention, &config.bot_handle, &author_handle);

    let target_user = match batch
        .resolve_user(
            client,
            &config.bearer_token,
            &config.api_v2_base,
            &target_username,
        )
        .await?
    {
        ResolvedUser::Found(user) => user,
        ResolvedUser::Absent => {
            mark_processed(ledger, &mention.id).await?;
            counters.record_processed();
            counters.record_skip_absent_target();
            return Ok(Some(MentionOutcome::SkipAbsentTarget));
        }
    };
    let target_pfp = normalize_profile_image_url(&target_user.profile_image_url);
    if let Err(reason) = crate::engine::head_validate(client, &target_pfp).await {
        return Err(EngineError::BadTargetUrl(reason));
    }

    {
        let mut outgoing = shared.outgoing.lock().await;
        if !outgoing.allow(&target_user.username_key(), Instant::now()) {
            mark_processed(ledger, &mention.id).await?;
            counters.record_processed();
            counters.record_rate_limited_out();
            return Ok(Some(MentionOutcome::RateLimitedOut));
        }
    }

    let _slot = shared
        .slots
        .acquire()
        .await
        .expect("pipeline semaphore is never closed");

    let transform_result = match config.image_pipeline {
        ImagePipeline::Ai => {
            transform::run_with_retries(
                client.raw(),
                &config.transform_service_url,
                &config.transform_service_token,
                &config.style_image_url,
                &target_pfp,
                config.ai_poll_interval,
                config.ai_timeout,
                config.ai_max_attempts,
            )
            .await
        }
        ImagePipeline::Placeholder => transform::run_placeholder().await,
    };

    let image_bytes = match transform_result {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(mention_id = %mention.id, error = %err, "transform exhausted, falling back to text-only reply");
            endpoints::post_reply(
                client,
                &config.api_v2_base,
                &config.oauth,
                FALLBACK_BODY,
                &mention.id,
                None,
            )
            .await?;
            mark_processed(ledger, &mention.id).await?;
            counters.record_processed();
            counters.record_ai_fail();
            return Ok(Some(MentionOutcome::TextFallback));
        }
    };

    let post_result = async {
        let media_id =
            endpoints::upload_media(client, &config.api_v1_base, &config.oauth, image_bytes)
                .await?;
        let body = REPLY_BODY_TEMPLATE.replace("{target}", &target_user.username);
        endpoints::post_reply(
            client,
            &config.api_v2_base,
            &config.oauth,
            &body,
            &mention.id,
            Some(&media_id),
        )
        .await
    }
    .await;

    match post_result {
        Ok(_) => {
            mark_processed(ledger, &mention.id).await?;
            counters.record_processed();
            counters.record_reply_sent();
            Ok(Some(MentionOutcome::Replied))
        }
        Err(err) => {
            tracing::error!(mention_id = %mention.id, error = %err, "post failed, mention left unprocessed");
            counters.record_post_fail();
            Ok(None)
        }
    }
}

async fn mark_processed(
    ledger: &AsyncMutex<ProcessedLedger>,
    mention_id: &str,
) -> Result<(), EngineError> {
    ledger
        .lock()
        .await
        .mark_processed(mention_id.to_string())
        .await
        .map_err(EngineError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_body_substitutes_target_handle() {
        let body = REPLY_BODY_TEMPLATE.replace("{target}", "alice");
        assert_eq!(
            body,
            "Welcome to $CRYBB @alice 🍼\n\nNO CRYING IN THE CASINO."
        );
    }
}
