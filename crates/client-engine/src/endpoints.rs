//! Concrete microblog API endpoint wrappers (§6) built on top of [`crate::http::MicroblogClient`].

use reqwest::Method;

use crybb_bot_core::config::Secret;
use crybb_bot_core::errors::EngineError;

use crate::http::{Credential, MicroblogClient, OAuth1Credentials};
use crate::model::{Mention, MentionEntity, User};

#[derive(serde::Deserialize)]
struct MentionsResponse {
    #[serde(default)]
    data: Vec<MentionDto>,
    #[serde(default)]
    includes: Includes,
}

#[derive(serde::Deserialize, Default)]
struct Includes {
    #[serde(default)]
    users: Vec<UserDto>,
}

#[derive(serde::Deserialize)]
struct UserDto {
    id: String,
    username: String,
    name: String,
    profile_image_url: String,
}

impl From<UserDto> for User {
    fn from(dto: UserDto) -> Self {
        User {
            id: dto.id,
            username: dto.username,
            display_name: dto.name,
            profile_image_url: dto.profile_image_url,
        }
    }
}

#[derive(serde::Deserialize)]
struct MentionDto {
    id: String,
    author_id: String,
    created_at: chrono::DateTime<chrono::Utc>,
    text: String,
    #[serde(default)]
    entities: Option<EntitiesDto>,
}

#[derive(serde::Deserialize, Default)]
struct EntitiesDto {
    #[serde(default)]
    mentions: Vec<EntityMentionDto>,
}

#[derive(serde::Deserialize)]
struct EntityMentionDto {
    username: String,
    start: u32,
    end: u32,
}

fn mention_from_dto(dto: MentionDto, author_username: String) -> Mention {
    let mentions = dto
        .entities
        .unwrap_or_default()
        .mentions
        .into_iter()
        .map(|m| MentionEntity {
            username: m.username,
            start: m.start,
            end: m.end,
        })
        .collect();
    Mention {
        id: dto.id,
        author_id: dto.author_id,
        author_username,
        created_at: dto.created_at,
        text: dto.text,
        mentions,
    }
}

/// A fetched page of mentions plus the user expansions carried alongside it.
pub(crate) struct MentionsPage {
    /// Mentions, ascending by id per the API contract.
    pub mentions: Vec<Mention>,
    /// Users referenced by any mention in this page (the expansions block, §4.3).
    pub expanded_users: Vec<User>,
}

/// `GET /users/{id}/mentions` (§6). Bearer-authed.
pub(crate) async fn fetch_mentions(
    client: &MicroblogClient,
    api_v2_base: &str,
    bearer: &Secret,
    bot_user_id: &str,
    since_id: Option<&str>,
) -> Result<MentionsPage, EngineError> {
    let url = format!("{api_v2_base}/users/{bot_user_id}/mentions");
    let mut query = vec![
        ("max_results", "10".to_string()),
        (
            "expansions",
            "author_id,entities.mentions.username".to_string(),
        ),
        (
            "user.fields",
            "id,username,name,profile_image_url".to_string(),
        ),
        (
            "tweet.fields",
            "created_at,entities,author_id".to_string(),
        ),
    ];
    if let Some(since_id) = since_id {
        query.push(("since_id", since_id.to_string()));
    }
    let query_refs: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, v.as_str())).collect();

    let mut outcome = client
        .call(
            "users/mentions",
            Method::GET,
            &url,
            Credential::Bearer(bearer),
            &query_refs,
            crate::http::RequestBody::None,
        )
        .await?;

    // `call` already slept until reset + 5s before returning RateLimited; the registry floor
    // has cleared, so one more attempt is expected to succeed rather than go back to sleeping
    // for a full poll cadence.
    if matches!(outcome, crate::http::CallOutcome::RateLimited) {
        outcome = client
            .call(
                "users/mentions",
                Method::GET,
                &url,
                Credential::Bearer(bearer),
                &query_refs,
                crate::http::RequestBody::None,
            )
            .await?;
    }

    let response = match outcome {
        crate::http::CallOutcome::Success(response) => response,
        crate::http::CallOutcome::RateLimited => {
            return Err(EngineError::RateLimited { retry_after_secs: 0 });
        }
    };

    let parsed: MentionsResponse = response
        .json()
        .await
        .map_err(|err| EngineError::TransientNetwork(err.to_string()))?;

    let author_by_id: std::collections::HashMap<&str, &str> = parsed
        .includes
        .users
        .iter()
        .map(|u| (u.id.as_str(), u.username.as_str()))
        .collect();

    let mentions = parsed
        .data
        .into_iter()
        .map(|dto| {
            let author_username = author_by_id
                .get(dto.author_id.as_str())
                .map(|u| u.to_string())
                .unwrap_or_else(|| dto.author_id.clone());
            mention_from_dto(dto, author_username)
        })
        .collect();

    Ok(MentionsPage {
        mentions,
        expanded_users: parsed.includes.users.into_iter().map(User::from).collect(),
    })
}

/// `POST /1.1/media/upload.json` (§6, multipart). User-context credential. Returns the
/// uploaded media's id.
pub(crate) async fn upload_media(
    client: &MicroblogClient,
    api_v1_base: &str,
    oauth: &OAuth1Credentials,
    image_bytes: Vec<u8>,
) -> Result<String, EngineError> {
    let url = format!("{api_v1_base}/media/upload.json");

    let outcome = client
        .call(
            "media/upload",
            Method::POST,
            &url,
            Credential::UserContext(oauth),
            &[],
            crate::http::RequestBody::MultipartBytes {
                field_name: "media",
                file_name: "image.png",
                bytes: &image_bytes,
            },
        )
        .await
        .map_err(|err| match err {
            EngineError::ClientError { status, body } => {
                EngineError::PostFailure(format!("media upload failed ({status}): {body}"))
            }
            other => other,
        })?;

    let response = match outcome {
        crate::http::CallOutcome::Success(response) => response,
        crate::http::CallOutcome::RateLimited => {
            return Err(EngineError::RateLimited { retry_after_secs: 0 });
        }
    };

    #[derive(serde::Deserialize)]
    struct UploadResponse {
        media_id_string: String,
    }
    let parsed: UploadResponse = response
        .json()
        .await
        .map_err(|err| EngineError::PostFailure(err.to_string()))?;
    Ok(parsed.media_id_string)
}

/// `POST /tweets` (§6). User-context credential.
pub(crate) async fn post_reply(
    client: &MicroblogClient,
    api_v2_base: &str,
    oauth: &OAuth1Credentials,
    text: &str,
    in_reply_to_id: &str,
    media_id: Option<&str>,
) -> Result<String, EngineError> {
    let url = format!("{api_v2_base}/tweets");
    let mut body = serde_json::json!({
        "text": text,
        "reply": { "in_reply_to_tweet_id": in_reply_to_id },
    });
    if let Some(media_id) = media_id {
        body["media"] = serde_json::json!({ "media_ids": [media_id] });
    }

    let outcome = client
        .call(
            "tweets",
            Method::POST,
            &url,
            Credential::UserContext(oauth),
            &[],
            crate::http::RequestBody::Json(&body),
        )
        .await
        .map_err(|err| match err {
            EngineError::ClientError { status, body } => {
                EngineError::PostFailure(format!("post reply failed ({status}): {body}"))
            }
            other => other,
        })?;

    let response = match outcome {
        crate::http::CallOutcome::Success(response) => response,
        crate::http::CallOutcome::RateLimited => {
            return Err(EngineError::RateLimited { retry_after_secs: 0 });
        }
    };

    #[derive(serde::Deserialize)]
    struct PostResponse {
        data: PostData,
    }
    #[derive(serde::Deserialize)]
    struct PostData {
        id: String,
    }
    let parsed: PostResponse = response
        .json()
        .await
        .map_err(|err| EngineError::PostFailure(err.to_string()))?;
    Ok(parsed.data.id)
}

/// `GET /users/{id}/tweets` (§4.9, §6). Bearer-authed.
pub(crate) async fn fetch_own_recent_posts(
    client: &MicroblogClient,
    api_v2_base: &str,
    bearer: &Secret,
    bot_user_id: &str,
) -> Result<Vec<(String, u64)>, EngineError> {
    let url = format!("{api_v2_base}/users/{bot_user_id}/tweets");
    let outcome = client
        .call(
            "users/tweets",
            Method::GET,
            &url,
            Credential::Bearer(bearer),
            &[("tweet.fields", "public_metrics")],
            crate::http::RequestBody::None,
        )
        .await?;

    let response = match outcome {
        crate::http::CallOutcome::Success(response) => response,
        crate::http::CallOutcome::RateLimited => return Ok(Vec::new()),
    };

    #[derive(serde::Deserialize)]
    struct TimelineResponse {
        #[serde(default)]
        data: Vec<TweetDto>,
    }
    #[derive(serde::Deserialize)]
    struct TweetDto {
        id: String,
        public_metrics: PublicMetrics,
    }
    #[derive(serde::Deserialize)]
    struct PublicMetrics {
        like_count: u64,
    }

    let parsed: TimelineResponse = response
        .json()
        .await
        .map_err(|err| EngineError::TransientNetwork(err.to_string()))?;
    Ok(parsed
        .data
        .into_iter()
        .map(|t| (t.id, t.public_metrics.like_count))
        .collect())
}

/// `POST /1.1/statuses/retweet/{id}.json` (§4.9, §6). User-context credential.
pub(crate) async fn repost(
    client: &MicroblogClient,
    api_v1_base: &str,
    oauth: &OAuth1Credentials,
    tweet_id: &str,
) -> Result<(), EngineError> {
    let url = format!("{api_v1_base}/statuses/retweet/{tweet_id}.json");
    client
        .call(
            "statuses/retweet",
            Method::POST,
            &url,
            Credential::UserContext(oauth),
            &[],
            crate::http::RequestBody::None,
        )
        .await?;
    Ok(())
}

/// `GET /users/me` (§6). Bearer-authed; callers are expected to cache the result for the
/// process lifetime (the endpoint's own response is cacheable for 1h per §6).
pub(crate) async fn fetch_own_user_id(
    client: &MicroblogClient,
    api_v2_base: &str,
    bearer: &Secret,
) -> Result<String, EngineError> {
    let url = format!("{api_v2_base}/users/me");
    let outcome = client
        .call(
            "users/me",
            Method::GET,
            &url,
            Credential::Bearer(bearer),
            &[],
            crate::http::RequestBody::None,
        )
        .await?;

    let response = match outcome {
        crate::http::CallOutcome::Success(response) => response,
        crate::http::CallOutcome::RateLimited => {
            return Err(EngineError::RateLimited { retry_after_secs: 0 });
        }
    };

    #[derive(serde::Deserialize)]
    struct MeResponse {
        data: MeData,
    }
    #[derive(serde::Deserialize)]
    struct MeData {
        id: String,
    }
    let parsed: MeResponse = response
        .json()
        .await
        .map_err(|err| EngineError::TransientNetwork(err.to_string()))?;
    Ok(parsed.data.id)
}
