pub mod http;

use crate::item::Item;
use crate::user::UserInfo;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Errors from the upstream site. The engine's control flow keys off
/// [`SiteError::NotFound`] (deleted/shadowbanned users) and
/// [`SiteError::Forbidden`] (lost moderator permissions); everything else is
/// treated as transient.
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("HTTP status {0}")]
    Status(u16),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}

impl SiteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden)
    }
}

pub type SiteResult<T> = Result<T, SiteError>;

/// A message in the bot account's inbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    /// Community the message was sent on behalf of, for moderation invites.
    #[serde(default)]
    pub community: Option<String>,
    #[serde(default)]
    pub was_comment: bool,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
}

/// Everything the engine needs from the upstream site. Implemented over HTTP
/// by [`http::HttpSite`]; tests substitute a scripted fake.
#[async_trait]
pub trait SiteClient: Send + Sync {
    /// Name of the account this client is authenticated as.
    fn username(&self) -> &str;

    /// Newest-first item streams for a set of communities.
    async fn new_submissions(&self, communities: &[String]) -> SiteResult<Vec<Item>>;
    async fn new_comments(&self, communities: &[String]) -> SiteResult<Vec<Item>>;
    async fn mod_queue(&self, communities: &[String]) -> SiteResult<Vec<Item>>;
    async fn reported_items(&self, communities: &[String]) -> SiteResult<Vec<Item>>;

    async fn user_info(&self, name: &str) -> SiteResult<UserInfo>;
    /// Whether the user's public activity listing 404s.
    async fn user_is_shadowbanned(&self, name: &str) -> SiteResult<bool>;

    async fn moderators(&self, community: &str) -> SiteResult<Vec<String>>;
    async fn contributors(&self, community: &str) -> SiteResult<Vec<String>>;
    /// Communities the bot account currently moderates.
    async fn moderated_communities(&self) -> SiteResult<Vec<String>>;

    async fn remove(&self, fullname: &str, spam: bool) -> SiteResult<()>;
    async fn approve(&self, fullname: &str) -> SiteResult<()>;
    async fn report(&self, fullname: &str, reason: Option<&str>) -> SiteResult<()>;

    async fn mark_nsfw(&self, fullname: &str) -> SiteResult<()>;
    async fn set_contest_mode(&self, fullname: &str) -> SiteResult<()>;
    async fn set_sticky(&self, fullname: &str) -> SiteResult<()>;

    async fn set_link_flair(&self, fullname: &str, text: &str, css_class: &str) -> SiteResult<()>;
    async fn set_user_flair(
        &self,
        community: &str,
        user: &str,
        text: &str,
        css_class: &str,
    ) -> SiteResult<()>;

    /// Post a reply under an item, returning the new comment's fullname.
    async fn reply(&self, parent_fullname: &str, body: &str) -> SiteResult<String>;
    /// Mark one of the bot's own comments as an official moderator comment.
    async fn distinguish(&self, fullname: &str) -> SiteResult<()>;

    /// Send a private message to a user.
    async fn send_message(&self, to: &str, subject: &str, body: &str) -> SiteResult<()>;
    /// Send a message to a community's moderator inbox.
    async fn send_modmail(&self, community: &str, subject: &str, body: &str) -> SiteResult<()>;

    async fn inbox(&self) -> SiteResult<Vec<Message>>;
    async fn accept_invite(&self, community: &str) -> SiteResult<()>;

    async fn wiki_page(&self, community: &str, page: &str) -> SiteResult<String>;
}
