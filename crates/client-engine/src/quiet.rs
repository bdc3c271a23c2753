//! Quiet-period companion activity (§4.9): re-post the bot's own well-liked recent posts.
//! Fire-and-forget; failures are logged and never affect mention processing.

use std::collections::HashSet;
use std::sync::Mutex;

use crybb_bot_core::errors::EngineError;

use crate::api::EngineConfig;
use crate::endpoints;
use crate::http::MicroblogClient;

/// Process-local record of posts already re-posted this session, so the activity never
/// re-posts the same post twice even across repeated quiet-cadence iterations.
#[derive(Default)]
pub struct AlreadyRepostedSet {
    ids: Mutex<HashSet<String>>,
}

impl AlreadyRepostedSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    fn already_reposted(&self, id: &str) -> bool {
        self.ids.lock().expect("reposted set poisoned").contains(id)
    }

    fn mark(&self, id: &str) {
        self.ids
            .lock()
            .expect("reposted set poisoned")
            .insert(id.to_string());
    }
}

/// Fetches the bot's recent posts and re-posts every one at or above
/// `config.rt_like_threshold` that hasn't been re-posted this session.
pub async fn run(
    client: &MicroblogClient,
    config: &EngineConfig,
    bot_user_id: &str,
    reposted: &AlreadyRepostedSet,
) -> Result<usize, EngineError> {
    let posts = endpoints::fetch_own_recent_posts(
        client,
        &config.api_v2_base,
        &config.bearer_token,
        bot_user_id,
    )
    .await?;

    let mut reposted_count = 0;
    for (post_id, like_count) in posts {
        if like_count < config.rt_like_threshold {
            continue;
        }
        if reposted.already_reposted(&post_id) {
            continue;
        }
        endpoints::repost(client, &config.api_v1_base, &config.oauth, &post_id).await?;
        reposted.mark(&post_id);
        reposted_count += 1;
    }
    Ok(reposted_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_marks_reposted_after_the_caller_confirms_success() {
        let set = AlreadyRepostedSet::new();
        assert!(!set.already_reposted("1"));
        set.mark("1");
        assert!(set.already_reposted("1"));
        assert!(!set.already_reposted("2"));
    }
}
