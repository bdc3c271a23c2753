//! Processed-id ledger and high-watermark (§4.7), persisted as two flat JSON files under a
//! configured directory via write-temp-then-rename, the same durability pattern the source
//! repository's `InflightStore` uses for its lease file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::LedgerError;

const PROCESSED_FILE: &str = "processed_ids.json";
const SINCE_ID_FILE: &str = "since_id.json";

/// Compares two opaque numeric-string mention ids as big integers: longer decimal strings are
/// larger, and same-length strings compare lexicographically. Mention ids never carry a sign or
/// leading zeros in the wire format this system consumes.
pub fn cmp_numeric_id(a: &str, b: &str) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SinceIdFile {
    since_id: Option<String>,
}

/// The durable set of mention-ids whose outcome is final, plus the high-watermark cursor.
///
/// Invariant upheld by construction: every id `i <= since_id` is present in `processed`.
pub struct ProcessedLedger {
    dir: PathBuf,
    processed: HashSet<String>,
    since_id: Option<String>,
}

impl ProcessedLedger {
    /// Load the ledger from `dir`, creating empty state if no files exist yet.
    pub async fn load(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        let dir_for_blocking = dir.clone();
        let (processed, since_id) = tokio::task::spawn_blocking(move || {
            let processed = read_processed(&dir_for_blocking)?;
            let since_id = read_since_id(&dir_for_blocking)?;
            Ok::<_, LedgerError>((processed, since_id))
        })
        .await
        .map_err(|err| LedgerError::Io(std::io::Error::other(err.to_string())))??;

        Ok(Self {
            dir,
            processed,
            since_id,
        })
    }

    /// Membership test against the processed set.
    pub fn is_processed(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    /// The current high-watermark, if any mention has ever been processed.
    pub fn since_id(&self) -> Option<&str> {
        self.since_id.as_deref()
    }

    /// Add `id` to the ledger. A no-op (no disk write) if already present, per the idempotence
    /// law `markProcessed(id); markProcessed(id)` having no observable effect the second time.
    pub async fn mark_processed(&mut self, id: impl Into<String>) -> Result<(), LedgerError> {
        let id = id.into();
        if self.processed.contains(&id) {
            return Ok(());
        }
        self.processed.insert(id);
        self.persist_processed().await
    }

    /// Advance the high-watermark to the last id of the longest contiguous prefix of
    /// `batch_ids_ascending` that is entirely contained in the processed set. Never regresses.
    /// Returns whether the watermark changed.
    pub async fn advance_high_watermark(
        &mut self,
        batch_ids_ascending: &[String],
    ) -> Result<bool, LedgerError> {
        let mut candidate: Option<&str> = None;
        for id in batch_ids_ascending {
            if self.processed.contains(id) {
                candidate = Some(id.as_str());
            } else {
                break;
            }
        }

        let Some(candidate) = candidate else {
            return Ok(false);
        };

        let should_advance = match &self.since_id {
            Some(current) => cmp_numeric_id(candidate, current) == std::cmp::Ordering::Greater,
            None => true,
        };
        if !should_advance {
            return Ok(false);
        }

        self.since_id = Some(candidate.to_string());
        self.persist_since_id().await?;
        Ok(true)
    }

    async fn persist_processed(&self) -> Result<(), LedgerError> {
        let dir = self.dir.clone();
        let ids: Vec<String> = self.processed.iter().cloned().collect();
        tokio::task::spawn_blocking(move || write_processed(&dir, &ids))
            .await
            .map_err(|err| LedgerError::Io(std::io::Error::other(err.to_string())))?
    }

    async fn persist_since_id(&self) -> Result<(), LedgerError> {
        let dir = self.dir.clone();
        let since_id = self.since_id.clone();
        tokio::task::spawn_blocking(move || write_since_id(&dir, since_id))
            .await
            .map_err(|err| LedgerError::Io(std::io::Error::other(err.to_string())))?
    }
}

fn read_processed(dir: &Path) -> Result<HashSet<String>, LedgerError> {
    let path = dir.join(PROCESSED_FILE);
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let raw = std::fs::read_to_string(&path)?;
    let ids: Vec<String> = serde_json::from_str(&raw)?;
    Ok(ids.into_iter().collect())
}

fn read_since_id(dir: &Path) -> Result<Option<String>, LedgerError> {
    let path = dir.join(SINCE_ID_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    let file: SinceIdFile = serde_json::from_str(&raw)?;
    Ok(file.since_id)
}

fn write_processed(dir: &Path, ids: &[String]) -> Result<(), LedgerError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(PROCESSED_FILE);
    let json = serde_json::to_string_pretty(ids)?;
    write_atomic(&path, &json)
}

fn write_since_id(dir: &Path, since_id: Option<String>) -> Result<(), LedgerError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(SINCE_ID_FILE);
    let json = serde_json::to_string_pretty(&SinceIdFile { since_id })?;
    write_atomic(&path, &json)
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), LedgerError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_id_compares_by_length_then_lexicographically() {
        assert_eq!(cmp_numeric_id("9", "10"), std::cmp::Ordering::Less);
        assert_eq!(cmp_numeric_id("100", "99"), std::cmp::Ordering::Greater);
        assert_eq!(cmp_numeric_id("50", "50"), std::cmp::Ordering::Equal);
    }

    #[tokio::test]
    async fn mark_processed_is_idempotent_and_durable_across_reload() {
        let tmp = tempdir();
        let mut ledger = ProcessedLedger::load(&tmp).await.unwrap();
        ledger.mark_processed("100").await.unwrap();
        ledger.mark_processed("100").await.unwrap();
        assert!(ledger.is_processed("100"));

        let reloaded = ProcessedLedger::load(&tmp).await.unwrap();
        assert!(reloaded.is_processed("100"));
        std::fs::remove_dir_all(&tmp).ok();
    }

    #[tokio::test]
    async fn since_id_round_trips() {
        let tmp = tempdir();
        let mut ledger = ProcessedLedger::load(&tmp).await.unwrap();
        ledger.mark_processed("100").await.unwrap();
        ledger
            .advance_high_watermark(&["100".to_string()])
            .await
            .unwrap();
        assert_eq!(ledger.since_id(), Some("100"));

        let reloaded = ProcessedLedger::load(&tmp).await.unwrap();
        assert_eq!(reloaded.since_id(), Some("100"));
        std::fs::remove_dir_all(&tmp).ok();
    }

    #[tokio::test]
    async fn high_watermark_stops_at_first_gap() {
        let tmp = tempdir();
        let mut ledger = ProcessedLedger::load(&tmp).await.unwrap();
        ledger.mark_processed("50").await.unwrap();
        ledger.mark_processed("52").await.unwrap();

        let ids = vec!["50".to_string(), "51".to_string(), "52".to_string()];
        let changed = ledger.advance_high_watermark(&ids).await.unwrap();
        assert!(changed);
        assert_eq!(ledger.since_id(), Some("50"));
        std::fs::remove_dir_all(&tmp).ok();
    }

    #[tokio::test]
    async fn high_watermark_never_regresses() {
        let tmp = tempdir();
        let mut ledger = ProcessedLedger::load(&tmp).await.unwrap();
        ledger.mark_processed("100").await.unwrap();
        ledger
            .advance_high_watermark(&["100".to_string()])
            .await
            .unwrap();

        ledger.mark_processed("50").await.unwrap();
        let changed = ledger
            .advance_high_watermark(&["50".to_string()])
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(ledger.since_id(), Some("100"));
        std::fs::remove_dir_all(&tmp).ok();
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "crybb-bot-ledger-test-{}-{}",
            std::process::id(),
            NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
        ));
        dir
    }

    static NEXT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
}
