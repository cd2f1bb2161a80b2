use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Fullname prefix for comments.
pub const KIND_COMMENT: &str = "t1";
/// Fullname prefix for submissions.
pub const KIND_SUBMISSION: &str = "t3";

/// Closed set of item attributes a rule's match keys may name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchTarget {
    LinkId,
    User,
    Title,
    Domain,
    Url,
    Body,
    MediaUser,
    MediaTitle,
    MediaDescription,
    MediaAuthorUrl,
    ParentCommentId,
    AuthorFlairText,
    AuthorFlairCssClass,
    LinkTitle,
    LinkUrl,
}

impl MatchTarget {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "link_id" => Self::LinkId,
            "user" => Self::User,
            "title" => Self::Title,
            "domain" => Self::Domain,
            "url" => Self::Url,
            "body" => Self::Body,
            "media_user" => Self::MediaUser,
            "media_title" => Self::MediaTitle,
            "media_description" => Self::MediaDescription,
            "media_author_url" => Self::MediaAuthorUrl,
            "parent_comment_id" => Self::ParentCommentId,
            "author_flair_text" => Self::AuthorFlairText,
            "author_flair_css_class" => Self::AuthorFlairCssClass,
            "link_title" => Self::LinkTitle,
            "link_url" => Self::LinkUrl,
            _ => return None,
        })
    }

    /// Targets that only ever have a value on submissions.
    /// A rule matching exclusively against these is inferred to be submission-only.
    pub fn submission_only(&self) -> bool {
        matches!(
            self,
            Self::Title
                | Self::Domain
                | Self::Url
                | Self::MediaUser
                | Self::MediaTitle
                | Self::MediaDescription
                | Self::MediaAuthorUrl
        )
    }
}

/// Embedded media metadata on a submission, as exposed by the upstream API.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Media {
    #[serde(default)]
    pub oembed: Option<Oembed>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Oembed {
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub community: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub num_reports: u32,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub banned_by: Option<String>,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub link_flair_text: String,
    #[serde(default)]
    pub link_flair_css_class: String,
    #[serde(default)]
    pub author_flair_text: String,
    #[serde(default)]
    pub author_flair_css_class: String,
    #[serde(default)]
    pub media: Option<Media>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub community: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: String,
    /// Fullname of the submission this comment lives under, e.g. `t3_abc123`.
    #[serde(default)]
    pub link_id: String,
    /// Fullname of the direct parent: `t1_…` for a reply, `t3_…` for a top-level comment.
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub link_author: Option<String>,
    #[serde(default)]
    pub link_title: String,
    #[serde(default)]
    pub link_url: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub num_reports: u32,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub banned_by: Option<String>,
    #[serde(default)]
    pub author_flair_text: String,
    #[serde(default)]
    pub author_flair_css_class: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemKind {
    Submission,
    Comment,
}

/// One item from any of the queues.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Item {
    Submission(Submission),
    Comment(Comment),
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Submission(_) => ItemKind::Submission,
            Self::Comment(_) => ItemKind::Comment,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Submission(s) => &s.id,
            Self::Comment(c) => &c.id,
        }
    }

    pub fn fullname(&self) -> String {
        match self {
            Self::Submission(s) => format!("{KIND_SUBMISSION}_{id}", id = s.id),
            Self::Comment(c) => format!("{KIND_COMMENT}_{id}", id = c.id),
        }
    }

    pub fn community(&self) -> &str {
        match self {
            Self::Submission(s) => &s.community,
            Self::Comment(c) => &c.community,
        }
    }

    pub fn author(&self) -> Option<&str> {
        match self {
            Self::Submission(s) => s.author.as_deref(),
            Self::Comment(c) => c.author.as_deref(),
        }
    }

    pub fn created_at(&self) -> OffsetDateTime {
        match self {
            Self::Submission(s) => s.created_at,
            Self::Comment(c) => c.created_at,
        }
    }

    pub fn num_reports(&self) -> u32 {
        match self {
            Self::Submission(s) => s.num_reports,
            Self::Comment(c) => c.num_reports,
        }
    }

    pub fn approved_by(&self) -> Option<&str> {
        match self {
            Self::Submission(s) => s.approved_by.as_deref(),
            Self::Comment(c) => c.approved_by.as_deref(),
        }
    }

    pub fn banned_by(&self) -> Option<&str> {
        match self {
            Self::Submission(s) => s.banned_by.as_deref(),
            Self::Comment(c) => c.banned_by.as_deref(),
        }
    }

    /// Permalink for messages and logging. Replies get thread context attached.
    pub fn permalink(&self) -> String {
        match self {
            Self::Submission(s) => s.permalink.clone(),
            Self::Comment(c) => {
                if self.is_reply() {
                    format!("{permalink}?context=5", permalink = c.permalink)
                } else {
                    c.permalink.clone()
                }
            }
        }
    }

    /// True for comments whose direct parent is another comment.
    pub fn is_reply(&self) -> bool {
        match self {
            Self::Submission(_) => false,
            Self::Comment(c) => c.parent_id.starts_with(&format!("{KIND_COMMENT}_")),
        }
    }

    /// The item's body before any blockquote stripping: selftext for
    /// submissions, comment text for comments.
    pub fn raw_body(&self) -> &str {
        match self {
            Self::Submission(s) => &s.selftext,
            Self::Comment(c) => &c.body,
        }
    }

    pub fn author_flair_text(&self) -> &str {
        match self {
            Self::Submission(s) => &s.author_flair_text,
            Self::Comment(c) => &c.author_flair_text,
        }
    }

    pub fn author_flair_css_class(&self) -> &str {
        match self {
            Self::Submission(s) => &s.author_flair_css_class,
            Self::Comment(c) => &c.author_flair_css_class,
        }
    }

    fn oembed_field(&self, pick: fn(&Oembed) -> &Option<String>) -> String {
        match self {
            Self::Submission(s) => s
                .media
                .as_ref()
                .and_then(|media| media.oembed.as_ref())
                .and_then(|oembed| pick(oembed).clone())
                .unwrap_or_default(),
            Self::Comment(_) => String::new(),
        }
    }

    /// The one place that maps a match target to the string it matches against.
    /// `body` is the body from [`Item::raw_body`], already blockquote-stripped
    /// if the rule asked for that.
    pub fn target_text(&self, target: MatchTarget, body: &str) -> String {
        match target {
            MatchTarget::User => self.author().unwrap_or_default().to_string(),
            MatchTarget::Body => body.to_string(),
            MatchTarget::LinkId => match self {
                // trim off the kind prefix
                Self::Comment(c) => c.link_id.chars().skip(3).collect(),
                Self::Submission(_) => String::new(),
            },
            MatchTarget::ParentCommentId => match self {
                Self::Comment(c) if c.parent_id.starts_with(&format!("{KIND_COMMENT}_")) => {
                    c.parent_id.chars().skip(3).collect()
                }
                _ => String::new(),
            },
            MatchTarget::Title => match self {
                Self::Submission(s) => s.title.clone(),
                Self::Comment(_) => String::new(),
            },
            MatchTarget::Domain => match self {
                Self::Submission(s) => s.domain.clone(),
                Self::Comment(_) => String::new(),
            },
            MatchTarget::Url => match self {
                // self-posts have no external URL to match
                Self::Submission(s) if !s.is_self => s.url.clone(),
                _ => String::new(),
            },
            MatchTarget::MediaUser => self.oembed_field(|o| &o.author_name),
            MatchTarget::MediaTitle => self.oembed_field(|o| &o.title),
            MatchTarget::MediaDescription => self.oembed_field(|o| &o.description),
            MatchTarget::MediaAuthorUrl => self.oembed_field(|o| &o.author_url),
            MatchTarget::AuthorFlairText => self.author_flair_text().to_string(),
            MatchTarget::AuthorFlairCssClass => self.author_flair_css_class().to_string(),
            MatchTarget::LinkTitle => match self {
                Self::Comment(c) => c.link_title.clone(),
                Self::Submission(_) => String::new(),
            },
            MatchTarget::LinkUrl => match self {
                Self::Comment(c) => c.link_url.clone(),
                Self::Submission(_) => String::new(),
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    pub fn submission(id: &str) -> Submission {
        Submission {
            id: id.to_string(),
            community: "testing".to_string(),
            author: Some("someone".to_string()),
            title: String::new(),
            selftext: String::new(),
            is_self: false,
            url: String::new(),
            domain: String::new(),
            permalink: format!("https://example.test/c/testing/comments/{id}/-/"),
            created_at: OffsetDateTime::UNIX_EPOCH,
            num_reports: 0,
            approved_by: None,
            banned_by: None,
            over_18: false,
            link_flair_text: String::new(),
            link_flair_css_class: String::new(),
            author_flair_text: String::new(),
            author_flair_css_class: String::new(),
            media: None,
        }
    }

    pub fn comment(id: &str, link_id: &str) -> Comment {
        Comment {
            id: id.to_string(),
            community: "testing".to_string(),
            author: Some("someone".to_string()),
            body: String::new(),
            link_id: format!("{KIND_SUBMISSION}_{link_id}"),
            parent_id: format!("{KIND_SUBMISSION}_{link_id}"),
            link_author: Some("op".to_string()),
            link_title: String::new(),
            link_url: String::new(),
            permalink: format!("https://example.test/c/testing/comments/{link_id}/-/{id}"),
            created_at: OffsetDateTime::UNIX_EPOCH,
            num_reports: 0,
            approved_by: None,
            banned_by: None,
            author_flair_text: String::new(),
            author_flair_css_class: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::{comment, submission};
    use super::*;

    #[test]
    fn test_link_id_drops_kind_prefix() {
        let item = Item::Comment(comment("c1", "abc123"));
        assert_eq!(item.target_text(MatchTarget::LinkId, ""), "abc123");
    }

    #[test]
    fn test_parent_comment_id_requires_comment_parent() {
        let mut c = comment("c1", "abc123");
        c.parent_id = format!("{KIND_COMMENT}_def456");
        let item = Item::Comment(c);
        assert!(item.is_reply());
        assert_eq!(item.target_text(MatchTarget::ParentCommentId, ""), "def456");

        let top_level = Item::Comment(comment("c2", "abc123"));
        assert!(!top_level.is_reply());
        assert_eq!(top_level.target_text(MatchTarget::ParentCommentId, ""), "");
    }

    #[test]
    fn test_url_empty_for_self_posts() {
        let mut s = submission("s1");
        s.url = "https://example.com/article".to_string();
        s.is_self = true;
        let item = Item::Submission(s);
        assert_eq!(item.target_text(MatchTarget::Url, ""), "");
    }

    #[test]
    fn test_media_targets_absent_keys_yield_empty() {
        let mut s = submission("s1");
        s.media = Some(Media {
            oembed: Some(Oembed {
                author_name: Some("clipchannel".to_string()),
                ..Default::default()
            }),
        });
        let item = Item::Submission(s);
        assert_eq!(item.target_text(MatchTarget::MediaUser, ""), "clipchannel");
        assert_eq!(item.target_text(MatchTarget::MediaTitle, ""), "");
    }
}
