use crate::action::execute_actions;
use crate::context::Context;
use crate::item::{Item, ItemKind};
use crate::matcher::check_item;
use crate::pattern::condition::{Action, Condition};
use crate::site::{SiteClient as _, SiteError};
use crate::store::{CommunityConfig, Store as _};
use anyhow::Result;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, error, info};

/// The four item streams checked per community.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Queue {
    Submission,
    Comment,
    Spam,
    Report,
}

impl Queue {
    pub const ALL: [Queue; 4] = [Queue::Submission, Queue::Comment, Queue::Spam, Queue::Report];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submission => "submission",
            Self::Comment => "comment",
            Self::Spam => "spam",
            Self::Report => "report",
        }
    }
}

/// Which of a community's conditions can possibly fire on a queue. Applied
/// once when a rule set is published.
pub fn filter_conditions(conditions: &[Arc<Condition>], queue: Queue) -> Vec<Arc<Condition>> {
    let below_report_threshold = |condition: &Condition| {
        condition
            .reports_threshold
            .map_or(true, |threshold| threshold < 1)
    };
    let requires_reports = |condition: &Condition| {
        condition
            .reports_threshold
            .map_or(false, |threshold| threshold > 0)
    };

    conditions
        .iter()
        .filter(|condition| match queue {
            Queue::Spam => {
                below_report_threshold(condition)
                    && !(condition.action == Some(Action::Report) && condition.report.is_some())
            }
            Queue::Report => {
                condition.action != Some(Action::Report)
                    && condition.report.is_none()
                    && (condition.action != Some(Action::Approve) || requires_reports(condition))
            }
            Queue::Submission => {
                condition.condition_type.applies_to(ItemKind::Submission)
                    && below_report_threshold(condition)
                    && (condition.action != Some(Action::Approve) || condition.report.is_some())
            }
            Queue::Comment => {
                condition.condition_type.applies_to(ItemKind::Comment)
                    && below_report_threshold(condition)
                    && (condition.action != Some(Action::Approve) || condition.report.is_some())
            }
        })
        .cloned()
        .collect()
}

/// Compiled rule sets for every community, split per queue at publish time.
#[derive(Default)]
pub struct RuleSets {
    communities: HashMap<String, HashMap<Queue, Vec<Arc<Condition>>>>,
}

impl RuleSets {
    /// Atomically replace a community's rule set.
    pub fn publish(&mut self, community: &str, conditions: Vec<Condition>) {
        let conditions: Vec<Arc<Condition>> = conditions.into_iter().map(Arc::new).collect();
        let per_queue = Queue::ALL
            .iter()
            .map(|queue| (*queue, filter_conditions(&conditions, *queue)))
            .collect();
        self.communities.insert(community.to_string(), per_queue);
    }

    pub fn conditions(&self, community: &str, queue: Queue) -> &[Arc<Condition>] {
        self.communities
            .get(community)
            .and_then(|per_queue| per_queue.get(&queue))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn contains(&self, community: &str) -> bool {
        self.communities.contains_key(community)
    }
}

fn is_forbidden(e: &anyhow::Error) -> bool {
    e.downcast_ref::<SiteError>()
        .map(SiteError::is_forbidden)
        .unwrap_or(false)
}

/// Walk one queue across every community that has rules for it.
///
/// Transient per-item errors are logged and the walk continues; a
/// permissions error aborts so the caller can re-discover its communities.
/// Watermarks advance only after the walk, and the submission watermark is
/// never advanced past an item a moderator already approved.
pub async fn check_queue(
    ctx: &Context,
    queue: Queue,
    communities: &mut HashMap<String, CommunityConfig>,
    rule_sets: &RuleSets,
) -> Result<()> {
    let names: Vec<String> = communities
        .keys()
        .filter(|name| !rule_sets.conditions(name, queue).is_empty())
        .cloned()
        .collect();
    if names.is_empty() {
        return Ok(());
    }

    info!("Checking {queue} queue", queue = queue.as_str());
    let items = match queue {
        Queue::Submission => ctx.site.new_submissions(&names).await?,
        Queue::Comment => ctx.site.new_comments(&names).await?,
        Queue::Spam => ctx.site.mod_queue(&names).await?,
        Queue::Report => ctx.site.reported_items(&names).await?,
    };

    let now = OffsetDateTime::now_utc();
    let stop_time = match queue {
        Queue::Report => now - time::Duration::hours(ctx.settings.report_backlog_limit_hours),
        _ => names
            .iter()
            .filter_map(|name| communities.get(name))
            .filter_map(|community| community.watermark(queue))
            .max()
            .unwrap_or(now),
    };

    let bot_username = ctx.site.username().to_lowercase();
    let mut item_count = 0usize;
    let mut last_updates: HashMap<String, OffsetDateTime> = HashMap::new();

    for item in &items {
        // the spam queue also lists reported-but-not-removed items
        if queue == Queue::Spam && item.banned_by().is_none() {
            continue;
        }

        // never check the bot's own comments
        if item.kind() == ItemKind::Comment
            && item
                .author()
                .map(|author| author.to_lowercase() == bot_username)
                .unwrap_or(false)
        {
            continue;
        }

        let item_time = item.created_at();
        if item_time < stop_time && (queue != Queue::Submission || item.approved_by().is_none()) {
            break;
        }

        let Some(community) = communities.get(item.community()) else {
            continue;
        };
        let conditions = rule_sets.conditions(item.community(), queue);
        if conditions.is_empty() {
            continue;
        }

        if queue != Queue::Report
            && (queue != Queue::Submission || item.approved_by().is_none())
            && !last_updates.contains_key(item.community())
        {
            last_updates.insert(item.community().to_string(), item_time);
        }

        let check_shadowbanned = queue == Queue::Spam && !community.exclude_banned_modqueue;
        item_count += 1;

        let result = check_item_conditions(
            ctx,
            item,
            conditions,
            check_shadowbanned,
            &bot_username,
        )
        .await;
        match result {
            Ok(()) => {}
            Err(e) if is_forbidden(&e) => {
                error!(
                    "Permissions error in {community}",
                    community = item.community()
                );
                return Err(e);
            }
            Err(e) => {
                error!(
                    "Error checking {fullname}: {e:#}",
                    fullname = item.fullname()
                );
            }
        }
    }

    for (name, item_time) in last_updates {
        if let Some(community) = communities.get_mut(&name) {
            debug!(
                "{name}: last_{queue} = {item_time}",
                queue = queue.as_str()
            );
            community.set_watermark(queue, item_time);
            ctx.store.upsert_community(community).await?;
        }
    }

    info!(
        "Checked {item_count} items in {queue} queue",
        queue = queue.as_str()
    );
    Ok(())
}

/// Evaluate one item against a queue's conditions: removal-class rules
/// first with short-circuit, then everything else.
async fn check_item_conditions(
    ctx: &Context,
    item: &Item,
    conditions: &[Arc<Condition>],
    check_shadowbanned: bool,
    bot_username: &str,
) -> Result<()> {
    let removals: Vec<Arc<Condition>> = conditions
        .iter()
        .filter(|condition| {
            condition
                .action
                .map(|action| action.is_removal())
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    if check_conditions(ctx, item, &removals, check_shadowbanned, bot_username, true).await? {
        return Ok(());
    }

    let others: Vec<Arc<Condition>> = conditions
        .iter()
        .filter(|condition| {
            !condition.action.map(|action| action.is_removal()).unwrap_or(false) || condition.report.is_some()
        })
        .cloned()
        .collect();
    check_conditions(ctx, item, &others, check_shadowbanned, bot_username, false).await?;
    Ok(())
}

/// Check an item against a sorted condition list, applying the idempotence
/// and exemption guards before each evaluation. Returns whether anything
/// matched.
async fn check_conditions(
    ctx: &Context,
    item: &Item,
    conditions: &[Arc<Condition>],
    check_shadowbanned: bool,
    bot_username: &str,
    stop_after_match: bool,
) -> Result<bool> {
    let mut conditions: Vec<&Arc<Condition>> = conditions
        .iter()
        .filter(|condition| condition.condition_type.applies_to(item.kind()))
        .collect();

    // high priority first; among equals, cheap conditions first
    conditions.sort_by_key(|condition| {
        (Reverse(condition.priority), condition.requests_required())
    });

    let fullname = item.fullname();
    let log_entries = ctx.store.actions_for(&fullname).await?;
    let mut performed_actions: HashSet<String> = log_entries
        .iter()
        .filter_map(|entry| entry.action.clone())
        .collect();
    let mut performed_yaml: HashSet<String> = log_entries
        .iter()
        .map(|entry| entry.condition_yaml.clone())
        .collect();

    let mut any_matched = false;
    for condition in conditions {
        // moderators are exempt from punitive rules unless the rule opts out
        if condition.moderators_exempt
            && (condition
                .action
                .map(|action| action.is_removal() || action == Action::Report)
                .unwrap_or(false)
                || condition.report.is_some())
        {
            if let Some(author) = item.author() {
                if ctx.user_rank(item.community(), author).await? == crate::user::Rank::Moderator {
                    continue;
                }
            }
        }

        // never remove anything a different moderator approved
        if condition.action.map(|action| action.is_removal()).unwrap_or(false) {
            if let Some(approved_by) = item.approved_by() {
                if approved_by.to_lowercase() != bot_username {
                    continue;
                }
            }
        }

        // each action happens at most once per item
        if let Some(action) = condition.action {
            if performed_actions.contains(action.as_str()) {
                continue;
            }
        }
        if condition.report.is_some() && performed_actions.contains(Action::Report.as_str()) {
            continue;
        }

        // never send repeat comments/messages for the same item
        if condition.sends_messages() && performed_yaml.contains(&condition.yaml_source) {
            continue;
        }

        // never overwrite existing flair
        if condition.sets_link_flair() {
            if let Item::Submission(submission) = item {
                if !submission.link_flair_text.is_empty()
                    || !submission.link_flair_css_class.is_empty()
                {
                    continue;
                }
            }
        }
        if condition.sets_user_flair()
            && !condition.overwrite_user_flair
            && (!item.author_flair_text().is_empty() || !item.author_flair_css_class().is_empty())
        {
            continue;
        }

        let matched = match evaluate(ctx, condition, item, check_shadowbanned).await {
            Ok(matched) => matched,
            Err(e) if is_forbidden(&e) => return Err(e),
            Err(e) => {
                error!(
                    "Error evaluating condition against {fullname}: {e:#}\n{yaml}",
                    yaml = condition.yaml_source
                );
                false
            }
        };

        if matched {
            if let Some(action) = condition.action {
                performed_actions.insert(action.as_str().to_string());
            }
            if condition.report.is_some() {
                performed_actions.insert(Action::Report.as_str().to_string());
            }
            performed_yaml.insert(condition.yaml_source.clone());
            any_matched = true;
            if stop_after_match {
                break;
            }
        }
    }

    Ok(any_matched)
}

async fn evaluate(
    ctx: &Context,
    condition: &Condition,
    item: &Item,
    check_shadowbanned: bool,
) -> Result<bool> {
    let Some(outcome) = check_item(condition, item, ctx).await? else {
        return Ok(false);
    };
    execute_actions(condition, item, &outcome, ctx, check_shadowbanned).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::test_fixtures::{comment, submission};
    use crate::pattern::condition::condition_from_yaml;
    use crate::store::{ActionLogEntry, MemoryStore, Store};
    use crate::testutil::{test_context_with_store, FakeSite};

    fn rule_sets(community: &str, rules: &[&str]) -> RuleSets {
        let mut sets = RuleSets::default();
        sets.publish(
            community,
            rules.iter().map(|yaml| condition_from_yaml(yaml)).collect(),
        );
        sets
    }

    fn community_map(name: &str) -> HashMap<String, CommunityConfig> {
        let config = CommunityConfig::new(name.to_string(), OffsetDateTime::now_utc());
        HashMap::from([(name.to_string(), config)])
    }

    fn fresh_submission(id: &str) -> crate::item::Submission {
        let mut s = submission(id);
        s.created_at = OffsetDateTime::now_utc();
        s
    }

    fn fresh_comment(id: &str, link_id: &str) -> crate::item::Comment {
        let mut c = comment(id, link_id);
        c.created_at = OffsetDateTime::now_utc();
        c
    }

    #[test]
    fn test_filter_conditions_per_queue() {
        let conditions: Vec<Arc<Condition>> = [
            "domain: example.com\naction: remove\n",                // 0: submission removal
            "body: [spam]\naction: remove\n",                       // 1: both removal
            "reports: 2\nbody: [spam]\naction: remove\n",           // 2: report-gated
            "title: [ok]\naction: approve\n",                       // 3: plain approve
            "body: [x]\naction: report\n",                          // 4: report action
            "body: [x]\nreport: 'problem'\naction: report\n",       // 5: purely-report
        ]
        .iter()
        .map(|yaml| Arc::new(condition_from_yaml(yaml)))
        .collect();

        let yamls = |queue: Queue| -> Vec<String> {
            filter_conditions(&conditions, queue)
                .iter()
                .map(|condition| condition.yaml_source.clone())
                .collect()
        };

        let spam = yamls(Queue::Spam);
        assert!(spam.contains(&conditions[0].yaml_source));
        assert!(spam.contains(&conditions[4].yaml_source));
        assert!(!spam.contains(&conditions[2].yaml_source));
        assert!(!spam.contains(&conditions[5].yaml_source));

        let report = yamls(Queue::Report);
        assert!(report.contains(&conditions[0].yaml_source));
        assert!(report.contains(&conditions[2].yaml_source));
        assert!(!report.contains(&conditions[3].yaml_source));
        assert!(!report.contains(&conditions[4].yaml_source));

        let submission_queue = yamls(Queue::Submission);
        assert!(submission_queue.contains(&conditions[0].yaml_source));
        assert!(!submission_queue.contains(&conditions[3].yaml_source));
        assert!(!submission_queue.contains(&conditions[2].yaml_source));

        let comment_queue = yamls(Queue::Comment);
        assert!(!comment_queue.contains(&conditions[0].yaml_source));
        assert!(comment_queue.contains(&conditions[1].yaml_source));
    }

    #[tokio::test]
    async fn test_domain_removal_end_to_end() {
        let mut site = FakeSite::default();
        let mut s = fresh_submission("s1");
        s.domain = "www.example.com".to_string();
        let item_time = s.created_at;
        site.submissions.push(Item::Submission(s));
        let site = Arc::new(site);
        let store = Arc::new(MemoryStore::default());
        let ctx = test_context_with_store(site.clone(), store.clone());

        let sets = rule_sets(
            "testing",
            &["type: submission\ndomain: example.com\naction: remove\n"],
        );
        let mut communities = community_map("testing");

        check_queue(&ctx, Queue::Submission, &mut communities, &sets)
            .await
            .expect("queue walk failed");

        assert_eq!(site.calls(), vec!["remove t3_s1 spam=false"]);
        let rows = store.actions_for("t3_s1").await.expect("log read");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action.as_deref(), Some("remove"));
        // watermark advanced to the item
        assert_eq!(communities["testing"].last_submission, item_time);
    }

    #[tokio::test]
    async fn test_idempotence_across_restart() {
        let mut site = FakeSite::default();
        let mut s = fresh_submission("s1");
        s.domain = "example.com".to_string();
        s.banned_by = Some("modbot".to_string());
        site.modqueue.push(Item::Submission(s));
        let site = Arc::new(site);
        let store = Arc::new(MemoryStore::default());

        let rule = "type: submission\ndomain: example.com\naction: remove\n";
        store
            .append_action(&ActionLogEntry {
                item_fullname: "t3_s1".to_string(),
                condition_yaml: rule.to_string(),
                action: Some("remove".to_string()),
                timestamp: OffsetDateTime::now_utc(),
            })
            .await
            .expect("seed log");

        let ctx = test_context_with_store(site.clone(), store.clone());
        let sets = rule_sets("testing", &[rule]);
        let mut communities = community_map("testing");

        check_queue(&ctx, Queue::Spam, &mut communities, &sets)
            .await
            .expect("queue walk failed");

        // no effect re-submitted, no new log row
        assert!(site.calls().is_empty());
        assert_eq!(store.log_len().await, 1);
    }

    #[tokio::test]
    async fn test_removal_pass_short_circuits() {
        let mut site = FakeSite::default();
        let mut c = fresh_comment("c1", "s1");
        c.body = "buy cheap meds".to_string();
        site.comments.push(Item::Comment(c));
        let site = Arc::new(site);
        let store = Arc::new(MemoryStore::default());
        let ctx = test_context_with_store(site.clone(), store.clone());

        let sets = rule_sets(
            "testing",
            &[
                "body: [cheap]\naction: remove\n",
                "body: [meds]\naction: spam\n",
                "body: [buy]\ncomment: 'do not'\n",
            ],
        );
        let mut communities = community_map("testing");

        check_queue(&ctx, Queue::Comment, &mut communities, &sets)
            .await
            .expect("queue walk failed");

        // one removal fired; the other removal short-circuited, and the
        // non-removal pass is skipped entirely once a removal matched
        let calls = site.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("remove t1_c1"));
    }

    #[tokio::test]
    async fn test_priority_orders_evaluation() {
        let mut site = FakeSite::default();
        let mut c = fresh_comment("c1", "s1");
        c.body = "spammy text".to_string();
        site.comments.push(Item::Comment(c));
        let site = Arc::new(site);
        let store = Arc::new(MemoryStore::default());
        let ctx = test_context_with_store(site.clone(), store.clone());

        let sets = rule_sets(
            "testing",
            &[
                "body: [spammy]\naction: remove\n",
                "priority: 5\nbody: [spammy]\naction: spam\n",
            ],
        );
        let mut communities = community_map("testing");

        check_queue(&ctx, Queue::Comment, &mut communities, &sets)
            .await
            .expect("queue walk failed");

        assert_eq!(site.calls(), vec!["remove t1_c1 spam=true"]);
    }

    #[tokio::test]
    async fn test_moderators_exempt() {
        let mut site = FakeSite::default();
        site.moderators
            .insert("testing".to_string(), vec!["someone".to_string()]);
        let mut c = fresh_comment("c1", "s1");
        c.body = "spam".to_string();
        site.comments.push(Item::Comment(c));
        let site = Arc::new(site);
        let store = Arc::new(MemoryStore::default());
        let ctx = test_context_with_store(site.clone(), store.clone());

        let sets = rule_sets("testing", &["body: [spam]\naction: remove\n"]);
        let mut communities = community_map("testing");
        check_queue(&ctx, Queue::Comment, &mut communities, &sets)
            .await
            .expect("queue walk failed");
        assert!(site.calls().is_empty());

        // moderators_exempt: false opts back in
        let sets = rule_sets(
            "testing",
            &["body: [spam]\naction: remove\nmoderators_exempt: false\n"],
        );
        let mut communities = community_map("testing");
        check_queue(&ctx, Queue::Comment, &mut communities, &sets)
            .await
            .expect("queue walk failed");
        assert_eq!(site.calls(), vec!["remove t1_c1 spam=false"]);
    }

    #[tokio::test]
    async fn test_never_removes_items_approved_by_other_mods() {
        let mut site = FakeSite::default();
        let mut s = fresh_submission("s1");
        s.domain = "example.com".to_string();
        s.approved_by = Some("human_mod".to_string());
        site.submissions.push(Item::Submission(s));
        let site = Arc::new(site);
        let store = Arc::new(MemoryStore::default());
        let ctx = test_context_with_store(site.clone(), store.clone());

        let sets = rule_sets(
            "testing",
            &["type: submission\ndomain: example.com\naction: remove\n"],
        );
        let mut communities = community_map("testing");
        let before = communities["testing"].last_submission;

        check_queue(&ctx, Queue::Submission, &mut communities, &sets)
            .await
            .expect("queue walk failed");

        assert!(site.calls().is_empty());
        // the watermark doesn't consume approved items, so a rule change can
        // still re-scan them
        assert_eq!(communities["testing"].last_submission, before);
    }

    #[tokio::test]
    async fn test_spam_queue_skips_unremoved_items() {
        let mut site = FakeSite::default();
        let mut s = fresh_submission("s1");
        s.domain = "example.com".to_string();
        site.modqueue.push(Item::Submission(s));
        let site = Arc::new(site);
        let store = Arc::new(MemoryStore::default());
        let ctx = test_context_with_store(site.clone(), store.clone());

        let sets = rule_sets(
            "testing",
            &["type: submission\ndomain: example.com\naction: remove\n"],
        );
        let mut communities = community_map("testing");
        check_queue(&ctx, Queue::Spam, &mut communities, &sets)
            .await
            .expect("queue walk failed");

        assert!(site.calls().is_empty());
    }

    #[tokio::test]
    async fn test_repeat_comment_suppressed_by_yaml_key() {
        let rule = "body: [spam]\ncomment: 'please stop'\n";
        let mut site = FakeSite::default();
        let mut c = fresh_comment("c1", "s1");
        c.body = "spam".to_string();
        site.comments.push(Item::Comment(c));
        let site = Arc::new(site);
        let store = Arc::new(MemoryStore::default());
        store
            .append_action(&ActionLogEntry {
                item_fullname: "t1_c1".to_string(),
                condition_yaml: rule.to_string(),
                action: None,
                timestamp: OffsetDateTime::now_utc(),
            })
            .await
            .expect("seed log");
        let ctx = test_context_with_store(site.clone(), store.clone());

        let sets = rule_sets("testing", &[rule]);
        let mut communities = community_map("testing");
        check_queue(&ctx, Queue::Comment, &mut communities, &sets)
            .await
            .expect("queue walk failed");

        assert!(site.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bot_comments_skipped() {
        let mut site = FakeSite::default();
        let mut c = fresh_comment("c1", "s1");
        c.author = Some("ModBot".to_string());
        c.body = "spam".to_string();
        site.comments.push(Item::Comment(c));
        let site = Arc::new(site);
        let store = Arc::new(MemoryStore::default());
        let ctx = test_context_with_store(site.clone(), store.clone());

        let sets = rule_sets("testing", &["body: [spam]\naction: remove\n"]);
        let mut communities = community_map("testing");
        check_queue(&ctx, Queue::Comment, &mut communities, &sets)
            .await
            .expect("queue walk failed");

        assert!(site.calls().is_empty());
    }
}
