//! Scheduler (§4.1): the top-level polling loop that alternates batch iterations and sleeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

use crybb_bot_core::counters::Counters;
use crybb_bot_core::errors::EngineError;
use crybb_bot_core::ledger::{cmp_numeric_id, ProcessedLedger};

use crate::api::{EngineConfig, EngineEvent, EngineHandle};
use crate::batch::{BatchContext, BatchSnapshot, UserTtlCache};
use crate::endpoints;
use crate::http::MicroblogClient;
use crate::pipeline::{process_mention, PipelineShared};
use crate::quiet::AlreadyRepostedSet;

/// Consecutive empty-batch iterations before the scheduler switches to quiet cadence.
const QUIET_AFTER_EMPTY_ITERATIONS: u32 = 3;

pub(crate) struct EngineInner {
    pub(crate) event_tx: broadcast::Sender<EngineEvent>,
    stop_requested: AtomicBool,
    notify: tokio::sync::Notify,
}

impl EngineInner {
    pub(crate) fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            let _ = self.event_tx.send(EngineEvent::StopRequested);
            self.notify.notify_waiters();
        }
    }

    fn should_stop(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }
}

pub(crate) fn start_engine(config: EngineConfig, counters: Arc<Counters>) -> EngineHandle {
    let (event_tx, _) = broadcast::channel::<EngineEvent>(1024);
    let inner = Arc::new(EngineInner {
        event_tx,
        stop_requested: AtomicBool::new(false),
        notify: tokio::sync::Notify::new(),
    });

    let join = tokio::spawn(run_engine(inner.clone(), config, counters));
    EngineHandle { inner, join }
}

async fn run_engine(
    inner: Arc<EngineInner>,
    config: EngineConfig,
    counters: Arc<Counters>,
) -> anyhow::Result<()> {
    inner.emit(EngineEvent::Started);

    let client = MicroblogClient::new()?;
    validate_style_url(&client, &config).await?;

    let bot_user_id = endpoints::fetch_own_user_id(&client, &config.api_v2_base, &config.bearer_token)
        .await
        .map_err(|err| anyhow::anyhow!("resolve bot user id: {err}"))?;

    let ledger = AsyncMutex::new(ProcessedLedger::load(&config.outbox_dir).await?);
    let ttl_cache = UserTtlCache::new();
    let shared = PipelineShared::new(&config);
    let reposted = AlreadyRepostedSet::new();

    let mut quiet_streak: u32 = 0;

    loop {
        if inner.should_stop() {
            break;
        }

        let since_id = ledger.lock().await.since_id().map(str::to_string);
        let page = endpoints::fetch_mentions(
            &client,
            &config.api_v2_base,
            &config.bearer_token,
            &bot_user_id,
            since_id.as_deref(),
        )
        .await;

        let page = match page {
            Ok(page) => page,
            Err(err) => {
                inner.emit(EngineEvent::Error {
                    message: format!("fetch mentions: {err}"),
                });
                let is_quiet = quiet_streak >= QUIET_AFTER_EMPTY_ITERATIONS;
                sleep_with_cancellation(&inner, cadence_sleep(is_quiet, &config)).await;
                continue;
            }
        };

        inner.emit(EngineEvent::BatchFetched {
            count: page.mentions.len(),
        });

        if page.mentions.is_empty() {
            quiet_streak = quiet_streak.saturating_add(1);
        } else {
            quiet_streak = 0;
        }

        let mut mentions = page.mentions;
        mentions.sort_by(|a, b| cmp_numeric_id(&a.id, &b.id));
        for mention in &mentions {
            counters.record_mention_seen(mention.created_at.timestamp());
        }

        let snapshot = BatchSnapshot::from_users(page.expanded_users);
        let batch = BatchContext::new(snapshot, &ttl_cache);

        let batch_ref = &batch;
        let shared_ref = &shared;
        let client_ref = &client;
        let config_ref = &config;
        let ledger_ref = &ledger;
        let pipeline_futures = mentions.iter().map(|mention| {
            let counters = counters.clone();
            async move {
                let outcome = process_mention(
                    mention,
                    batch_ref,
                    shared_ref,
                    client_ref,
                    config_ref,
                    ledger_ref,
                    &counters,
                )
                .await;
                (mention.id.clone(), outcome)
            }
        });
        let results = futures::future::join_all(pipeline_futures).await;
        for (mention_id, outcome) in results {
            match outcome {
                Ok(Some(outcome)) => {
                    inner.emit(EngineEvent::MentionFinished { mention_id, outcome });
                }
                Ok(None) => {}
                Err(err) => {
                    inner.emit(EngineEvent::Error {
                        message: format!("mention {mention_id}: {err}"),
                    });
                }
            }
        }

        let ascending_ids: Vec<String> = mentions.iter().map(|m| m.id.clone()).collect();
        if let Err(err) = ledger.lock().await.advance_high_watermark(&ascending_ids).await {
            inner.emit(EngineEvent::Error {
                message: format!("advance high watermark: {err}"),
            });
        }

        let is_quiet = quiet_streak >= QUIET_AFTER_EMPTY_ITERATIONS;
        if is_quiet && let Err(err) = crate::quiet::run(&client, &config, &bot_user_id, &reposted).await {
            inner.emit(EngineEvent::Warning {
                message: format!("quiet-period activity failed: {err}"),
            });
        }

        if inner.should_stop() {
            break;
        }
        sleep_with_cancellation(&inner, cadence_sleep(is_quiet, &config)).await;
    }

    inner.emit(EngineEvent::Stopped);
    Ok(())
}

fn cadence_sleep(is_quiet: bool, config: &EngineConfig) -> std::time::Duration {
    let (min, max) = if is_quiet {
        (config.sleeper_min_secs, config.sleeper_max_secs)
    } else {
        (config.awake_min_secs, config.awake_max_secs)
    };
    if max <= min {
        return min;
    }
    let jitter_secs = rand::thread_rng().gen_range(0..=(max.as_secs() - min.as_secs()));
    min + std::time::Duration::from_secs(jitter_secs)
}

async fn sleep_with_cancellation(inner: &Arc<EngineInner>, duration: std::time::Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = inner.notify.notified() => {}
    }
}

async fn validate_style_url(
    client: &MicroblogClient,
    config: &EngineConfig,
) -> Result<(), EngineError> {
    head_validate(client, &config.style_image_url)
        .await
        .map_err(EngineError::BadStyleUrl)
}

/// HEAD-validates `url`, returning the failure reason as a plain string for the caller to
/// wrap in the error variant appropriate to what the URL is for (style vs. target pfp).
pub(crate) async fn head_validate(client: &MicroblogClient, url: &str) -> Result<(), String> {
    let response = client
        .raw()
        .head(url)
        .send()
        .await
        .map_err(|err| format!("HEAD request failed: {err}"))?;
    if !response.status().is_success() {
        return Err(format!("HEAD returned {}", response.status()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A bare-bones HTTP/1.1 server, mirroring `http.rs`'s test helper.
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
                    "HTTP/1.1 {status} status\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn head_validate_succeeds_on_a_2xx_response() {
        let addr = mock_server(vec![(200, "")]).await;
        let client = MicroblogClient::new().unwrap();
        head_validate(&client, &format!("http://{addr}/avatar.jpg"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn head_validate_fails_on_a_non_2xx_response() {
        let addr = mock_server(vec![(404, "")]).await;
        let client = MicroblogClient::new().unwrap();
        let err = head_validate(&client, &format!("http://{addr}/avatar.jpg"))
            .await
            .unwrap_err();
        assert!(err.contains("404"));
    }
}
