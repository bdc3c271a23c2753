//! Reply-target selection (§4.4). Pure function: same mention in, same target out.

use crate::model::{Mention, MentionEntity};

/// Picks the reply target from a mention's ordered `mentions` list.
///
/// 1. Find the leftmost entity matching `bot_handle` (case-insensitive).
/// 2. If it has a next entity that isn't the bot itself, target that.
/// 3. Otherwise, target the leftmost entity that is neither the bot nor the author.
/// 4. Otherwise, fall back to the author's own handle.
pub fn extract_target(mention: &Mention, bot_handle: &str, author_handle: &str) -> String {
    let bot = bot_handle.to_ascii_lowercase();
    let author = author_handle.to_ascii_lowercase();

    let mut entities: Vec<&MentionEntity> = mention.mentions.iter().collect();
    entities.sort_by_key(|e| e.start);

    let bot_pos = entities
        .iter()
        .position(|e| e.username.to_ascii_lowercase() == bot);

    if let Some(pos) = bot_pos
        && let Some(next) = entities.get(pos + 1)
        && next.username.to_ascii_lowercase() != bot
    {
        return next.username.clone();
    }

    if let Some(other) = entities.iter().find(|e| {
        let lower = e.username.to_ascii_lowercase();
        lower != bot && lower != author
    }) {
        return other.username.clone();
    }

    author_handle.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(username: &str, start: u32) -> MentionEntity {
        MentionEntity {
            username: username.to_string(),
            start,
            end: start + username.len() as u32,
        }
    }

    fn mention(mentions: Vec<MentionEntity>) -> Mention {
        Mention {
            id: "100".to_string(),
            author_id: "9".to_string(),
            author_username: "eve".to_string(),
            created_at: chrono::Utc::now(),
            text: String::new(),
            mentions,
        }
    }

    #[test]
    fn picks_entity_after_bot_handle() {
        let m = mention(vec![entity("bot", 0), entity("alice", 5)]);
        assert_eq!(extract_target(&m, "bot", "eve"), "alice");
    }

    #[test]
    fn falls_back_to_author_when_only_bot_mentioned() {
        let m = mention(vec![entity("bot", 0)]);
        assert_eq!(extract_target(&m, "bot", "eve"), "eve");
    }

    #[test]
    fn falls_back_to_other_leftmost_entity_when_bot_is_last() {
        let m = mention(vec![entity("carol", 0), entity("bot", 6)]);
        assert_eq!(extract_target(&m, "bot", "eve"), "carol");
    }

    #[test]
    fn skips_author_when_choosing_fallback_entity() {
        let m = mention(vec![entity("eve", 0), entity("bot", 4)]);
        assert_eq!(extract_target(&m, "bot", "eve"), "eve");
    }

    #[test]
    fn is_case_insensitive_on_handle_comparison() {
        let m = mention(vec![entity("BOT", 0), entity("Alice", 4)]);
        assert_eq!(extract_target(&m, "bot", "eve"), "Alice");
    }

    #[test]
    fn is_deterministic() {
        let m = mention(vec![entity("bot", 0), entity("alice", 5)]);
        assert_eq!(
            extract_target(&m, "bot", "eve"),
            extract_target(&m, "bot", "eve")
        );
    }
}
