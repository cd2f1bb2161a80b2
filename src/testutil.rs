//! Scripted collaborators for engine tests.

use crate::config::Settings;
use crate::context::Context;
use crate::item::Item;
use crate::site::{Message, SiteClient, SiteError, SiteResult};
use crate::store::MemoryStore;
use crate::user::UserInfo;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub fn test_settings() -> Settings {
    Settings {
        base_url: "https://example.test/".to_string(),
        username: "modbot".to_string(),
        token: "token".to_string(),
        owner_username: "owner".to_string(),
        standards_community: "modbot_standards".to_string(),
        wiki_page: "automoderation".to_string(),
        standards_wiki_page: "automoderation_standards".to_string(),
        report_backlog_limit_hours: 2,
        reports_check_period_mins: 5,
        last_message: 0,
        disclaimer: String::new(),
        state_dir: PathBuf::from("/nonexistent"),
    }
}

pub fn test_context(site: Arc<FakeSite>) -> Context {
    Context::new(
        PathBuf::from("/nonexistent"),
        test_settings(),
        site,
        Arc::new(MemoryStore::default()),
    )
}

pub fn test_context_with_store(site: Arc<FakeSite>, store: Arc<MemoryStore>) -> Context {
    Context::new(PathBuf::from("/nonexistent"), test_settings(), site, store)
}

/// Site double: returns scripted data and records every effect as a
/// formatted line in `calls`.
#[derive(Default)]
pub struct FakeSite {
    pub users: HashMap<String, UserInfo>,
    pub missing_users: HashSet<String>,
    pub shadowbanned: HashSet<String>,
    pub moderators: HashMap<String, Vec<String>>,
    pub contributors: HashMap<String, Vec<String>>,
    pub wiki_pages: HashMap<(String, String), String>,
    pub inbox_messages: Vec<Message>,
    pub moderated: Vec<String>,
    pub submissions: Vec<Item>,
    pub comments: Vec<Item>,
    pub modqueue: Vec<Item>,
    pub reports: Vec<Item>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn record(&self, call: String) {
        self.calls.lock().expect("poisoned").push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl SiteClient for FakeSite {
    fn username(&self) -> &str {
        "modbot"
    }

    async fn new_submissions(&self, _communities: &[String]) -> SiteResult<Vec<Item>> {
        Ok(self.submissions.clone())
    }

    async fn new_comments(&self, _communities: &[String]) -> SiteResult<Vec<Item>> {
        Ok(self.comments.clone())
    }

    async fn mod_queue(&self, _communities: &[String]) -> SiteResult<Vec<Item>> {
        Ok(self.modqueue.clone())
    }

    async fn reported_items(&self, _communities: &[String]) -> SiteResult<Vec<Item>> {
        Ok(self.reports.clone())
    }

    async fn user_info(&self, name: &str) -> SiteResult<UserInfo> {
        if self.missing_users.contains(name) {
            return Err(SiteError::NotFound);
        }
        self.users
            .get(name)
            .cloned()
            .ok_or_else(|| SiteError::Other(format!("unscripted user {name}")))
    }

    async fn user_is_shadowbanned(&self, name: &str) -> SiteResult<bool> {
        Ok(self.shadowbanned.contains(name))
    }

    async fn moderators(&self, community: &str) -> SiteResult<Vec<String>> {
        Ok(self.moderators.get(community).cloned().unwrap_or_default())
    }

    async fn contributors(&self, community: &str) -> SiteResult<Vec<String>> {
        Ok(self.contributors.get(community).cloned().unwrap_or_default())
    }

    async fn moderated_communities(&self) -> SiteResult<Vec<String>> {
        Ok(self.moderated.clone())
    }

    async fn remove(&self, fullname: &str, spam: bool) -> SiteResult<()> {
        self.record(format!("remove {fullname} spam={spam}"));
        Ok(())
    }

    async fn approve(&self, fullname: &str) -> SiteResult<()> {
        self.record(format!("approve {fullname}"));
        Ok(())
    }

    async fn report(&self, fullname: &str, reason: Option<&str>) -> SiteResult<()> {
        self.record(format!(
            "report {fullname} reason={reason}",
            reason = reason.unwrap_or("-")
        ));
        Ok(())
    }

    async fn mark_nsfw(&self, fullname: &str) -> SiteResult<()> {
        self.record(format!("mark_nsfw {fullname}"));
        Ok(())
    }

    async fn set_contest_mode(&self, fullname: &str) -> SiteResult<()> {
        self.record(format!("set_contest_mode {fullname}"));
        Ok(())
    }

    async fn set_sticky(&self, fullname: &str) -> SiteResult<()> {
        self.record(format!("set_sticky {fullname}"));
        Ok(())
    }

    async fn set_link_flair(&self, fullname: &str, text: &str, css_class: &str) -> SiteResult<()> {
        self.record(format!("set_link_flair {fullname} {text} {css_class}"));
        Ok(())
    }

    async fn set_user_flair(
        &self,
        community: &str,
        user: &str,
        text: &str,
        css_class: &str,
    ) -> SiteResult<()> {
        self.record(format!("set_user_flair {community} {user} {text} {css_class}"));
        Ok(())
    }

    async fn reply(&self, parent_fullname: &str, body: &str) -> SiteResult<String> {
        self.record(format!("reply {parent_fullname} {body}"));
        Ok("t1_botcomment".to_string())
    }

    async fn distinguish(&self, fullname: &str) -> SiteResult<()> {
        self.record(format!("distinguish {fullname}"));
        Ok(())
    }

    async fn send_message(&self, to: &str, subject: &str, body: &str) -> SiteResult<()> {
        self.record(format!("send_message {to} [{subject}] {body}"));
        Ok(())
    }

    async fn send_modmail(&self, community: &str, subject: &str, body: &str) -> SiteResult<()> {
        self.record(format!("send_modmail {community} [{subject}] {body}"));
        Ok(())
    }

    async fn inbox(&self) -> SiteResult<Vec<Message>> {
        Ok(self.inbox_messages.clone())
    }

    async fn accept_invite(&self, community: &str) -> SiteResult<()> {
        self.record(format!("accept_invite {community}"));
        Ok(())
    }

    async fn wiki_page(&self, community: &str, page: &str) -> SiteResult<String> {
        self.wiki_pages
            .get(&(community.to_string(), page.to_string()))
            .cloned()
            .ok_or(SiteError::NotFound)
    }
}
