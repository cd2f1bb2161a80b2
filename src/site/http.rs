use crate::config::USER_AGENT;
use crate::item::Item;
use crate::site::{Message, SiteClient, SiteError, SiteResult};
use crate::user::UserInfo;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

/// JSON API adapter for the upstream site. One instance per bot account.
#[derive(Clone, Debug)]
pub struct HttpSite {
    client: Client,
    base: Url,
    username: String,
    token: String,
}

impl HttpSite {
    pub fn new(base: Url, username: String, token: String) -> SiteResult<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            base,
            username,
            token,
        })
    }

    fn endpoint(&self, path: &str) -> SiteResult<Url> {
        self.base
            .join(path)
            .map_err(|e| SiteError::Other(format!("bad endpoint {path}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SiteResult<T> {
        let response = self
            .client
            .get(self.endpoint(path)?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> SiteResult<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint(path)?)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn check(response: reqwest::Response) -> SiteResult<reqwest::Response> {
        match response.status() {
            StatusCode::NOT_FOUND => Err(SiteError::NotFound),
            StatusCode::FORBIDDEN => Err(SiteError::Forbidden),
            status if !status.is_success() => Err(SiteError::Status(status.as_u16())),
            _ => Ok(response),
        }
    }

    /// Queue endpoints take a `+`-joined community list, like multi-listing URLs.
    async fn listing(&self, queue_path: &str, communities: &[String]) -> SiteResult<Vec<Item>> {
        let joined = communities.join("+");
        let listing: Listing = self
            .get_json(&format!("api/v1/communities/{joined}/{queue_path}"))
            .await?;
        Ok(listing.items)
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct NameList {
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedComment {
    fullname: String,
}

#[derive(Debug, Deserialize)]
struct WikiPage {
    content: String,
}

#[async_trait]
impl SiteClient for HttpSite {
    fn username(&self) -> &str {
        &self.username
    }

    async fn new_submissions(&self, communities: &[String]) -> SiteResult<Vec<Item>> {
        self.listing("new", communities).await
    }

    async fn new_comments(&self, communities: &[String]) -> SiteResult<Vec<Item>> {
        self.listing("comments", communities).await
    }

    async fn mod_queue(&self, communities: &[String]) -> SiteResult<Vec<Item>> {
        self.listing("about/modqueue", communities).await
    }

    async fn reported_items(&self, communities: &[String]) -> SiteResult<Vec<Item>> {
        self.listing("about/reports", communities).await
    }

    async fn user_info(&self, name: &str) -> SiteResult<UserInfo> {
        self.get_json(&format!("api/v1/users/{name}/about")).await
    }

    async fn user_is_shadowbanned(&self, name: &str) -> SiteResult<bool> {
        match self
            .get_json::<Listing>(&format!("api/v1/users/{name}/overview?limit=1"))
            .await
        {
            Ok(_) => Ok(false),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }

    async fn moderators(&self, community: &str) -> SiteResult<Vec<String>> {
        let list: NameList = self
            .get_json(&format!("api/v1/communities/{community}/about/moderators"))
            .await?;
        Ok(list.names)
    }

    async fn contributors(&self, community: &str) -> SiteResult<Vec<String>> {
        match self
            .get_json::<NameList>(&format!(
                "api/v1/communities/{community}/about/contributors"
            ))
            .await
        {
            Ok(list) => Ok(list.names),
            // private-contributor lists 404 for communities that don't use them
            Err(e) if e.is_not_found() => Ok(vec![]),
            Err(e) => Err(e),
        }
    }

    async fn moderated_communities(&self) -> SiteResult<Vec<String>> {
        let list: NameList = self.get_json("api/v1/me/moderated").await?;
        Ok(list.names)
    }

    async fn remove(&self, fullname: &str, spam: bool) -> SiteResult<()> {
        self.post_json("api/v1/moderation/remove", &json!({ "id": fullname, "spam": spam }))
            .await?;
        Ok(())
    }

    async fn approve(&self, fullname: &str) -> SiteResult<()> {
        self.post_json("api/v1/moderation/approve", &json!({ "id": fullname }))
            .await?;
        Ok(())
    }

    async fn report(&self, fullname: &str, reason: Option<&str>) -> SiteResult<()> {
        self.post_json("api/v1/report", &json!({ "id": fullname, "reason": reason }))
            .await?;
        Ok(())
    }

    async fn mark_nsfw(&self, fullname: &str) -> SiteResult<()> {
        self.post_json("api/v1/moderation/marknsfw", &json!({ "id": fullname }))
            .await?;
        Ok(())
    }

    async fn set_contest_mode(&self, fullname: &str) -> SiteResult<()> {
        self.post_json(
            "api/v1/moderation/contest_mode",
            &json!({ "id": fullname, "state": true }),
        )
        .await?;
        Ok(())
    }

    async fn set_sticky(&self, fullname: &str) -> SiteResult<()> {
        self.post_json("api/v1/moderation/sticky", &json!({ "id": fullname, "state": true }))
            .await?;
        Ok(())
    }

    async fn set_link_flair(&self, fullname: &str, text: &str, css_class: &str) -> SiteResult<()> {
        self.post_json(
            "api/v1/moderation/link_flair",
            &json!({ "id": fullname, "text": text, "css_class": css_class }),
        )
        .await?;
        Ok(())
    }

    async fn set_user_flair(
        &self,
        community: &str,
        user: &str,
        text: &str,
        css_class: &str,
    ) -> SiteResult<()> {
        self.post_json(
            &format!("api/v1/communities/{community}/user_flair"),
            &json!({ "user": user, "text": text, "css_class": css_class }),
        )
        .await?;
        Ok(())
    }

    async fn reply(&self, parent_fullname: &str, body: &str) -> SiteResult<String> {
        let created: CreatedComment = self
            .post_json(
                "api/v1/comment",
                &json!({ "parent": parent_fullname, "body": body }),
            )
            .await?
            .json()
            .await?;
        Ok(created.fullname)
    }

    async fn distinguish(&self, fullname: &str) -> SiteResult<()> {
        self.post_json("api/v1/moderation/distinguish", &json!({ "id": fullname }))
            .await?;
        Ok(())
    }

    async fn send_message(&self, to: &str, subject: &str, body: &str) -> SiteResult<()> {
        self.post_json(
            "api/v1/message/compose",
            &json!({ "to": to, "subject": subject, "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn send_modmail(&self, community: &str, subject: &str, body: &str) -> SiteResult<()> {
        self.post_json(
            &format!("api/v1/communities/{community}/modmail"),
            &json!({ "subject": subject, "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn inbox(&self) -> SiteResult<Vec<Message>> {
        #[derive(Debug, Deserialize)]
        struct Inbox {
            #[serde(default)]
            messages: Vec<Message>,
        }
        let inbox: Inbox = self.get_json("api/v1/me/inbox").await?;
        Ok(inbox.messages)
    }

    async fn accept_invite(&self, community: &str) -> SiteResult<()> {
        self.post_json(
            &format!("api/v1/communities/{community}/accept_invite"),
            &json!({}),
        )
        .await?;
        Ok(())
    }

    async fn wiki_page(&self, community: &str, page: &str) -> SiteResult<String> {
        let wiki: WikiPage = self
            .get_json(&format!("api/v1/communities/{community}/wiki/{page}"))
            .await?;
        Ok(wiki.content)
    }
}
