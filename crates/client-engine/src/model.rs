//! Wire-adjacent data model for a batch of mentions (§3).

use serde::{Deserialize, Serialize};

/// One entity in a mention's ordered `mentions` list: a `@username` occurrence with its
/// textual offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionEntity {
    /// Handle referenced, without the leading `@`.
    pub username: String,
    /// Start offset of the occurrence in `Mention::text`.
    pub start: u32,
    /// End offset (exclusive) of the occurrence in `Mention::text`.
    pub end: u32,
}

/// One incoming post that references the bot's handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    /// Opaque id, big-integer-comparable via `crybb_bot_core::ledger::cmp_numeric_id`.
    pub id: String,
    /// Id of the posting user.
    pub author_id: String,
    /// Handle of the posting user, resolved from the response's user expansions at fetch
    /// time (case as returned by the API).
    pub author_username: String,
    /// UTC creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Free text of the post.
    pub text: String,
    /// Ordered `@mentions` occurring in `text`.
    pub mentions: Vec<MentionEntity>,
}

/// A resolved account, as carried in a mentions response's expansions block or returned by
/// a user-by-username lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Opaque account id.
    pub id: String,
    /// Handle, original case as returned by the API. Compared case-insensitively elsewhere.
    pub username: String,
    /// Display name.
    pub display_name: String,
    /// Profile image URL, as returned (not yet normalized to the `400x400` size token).
    pub profile_image_url: String,
}

impl User {
    /// Case-insensitive key this user is indexed under in a [`crate::batch::BatchSnapshot`]
    /// or the global TTL cache.
    pub fn username_key(&self) -> String {
        self.username.to_ascii_lowercase()
    }
}
