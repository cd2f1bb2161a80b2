use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Public profile attributes of a site user, as returned by the user endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub link_karma: i64,
    #[serde(default)]
    pub comment_karma: i64,
    #[serde(default)]
    pub is_gold: bool,
}

impl UserInfo {
    pub fn combined_karma(&self) -> i64 {
        self.link_karma + self.comment_karma
    }

    pub fn account_age_days(&self, now: OffsetDateTime) -> i64 {
        (now - self.created_at).whole_days()
    }
}

/// A user's standing in a community, orderable from least to most privileged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rank {
    User,
    Contributor,
    Moderator,
}

impl Rank {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "user" => Self::User,
            "contributor" => Self::Contributor,
            "moderator" => Self::Moderator,
            _ => return None,
        })
    }

    /// Numeric value used by rank comparisons in user conditions.
    pub fn value(&self) -> i64 {
        match self {
            Self::User => 0,
            Self::Contributor => 1,
            Self::Moderator => 2,
        }
    }
}
