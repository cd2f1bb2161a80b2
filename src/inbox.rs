use crate::context::Context;
use crate::loader::{update_community_from_wiki, update_standards_from_wiki};
use crate::pattern::condition::Condition;
use crate::site::{Message, SiteClient as _};
use anyhow::Result;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{error, info, warn};

/// Owner-requested pause, mostly for manual intervention.
const SLEEP_DURATION: Duration = Duration::from_secs(10);

/// What an inbox pass changed; the main loop republishes accordingly.
#[derive(Default)]
pub struct InboxOutcome {
    /// Communities whose rule sets were re-ingested, with their fresh
    /// conditions.
    pub updated: Vec<(String, Vec<Condition>)>,
    /// Communities whose moderation invites were accepted.
    pub invited: Vec<String>,
    pub standards_updated: bool,
}

/// A community name from a message subject, tolerating pasted URLs or
/// `/c/name` prefixes.
fn community_from_subject(subject: &str) -> String {
    let name = match subject.rfind('/') {
        Some(index) => &subject[index + 1..],
        None => subject,
    };
    name.trim().to_string()
}

/// Process the bot's inbox: moderation invites, `update`,
/// `update_standards`, and the owner's `sleep` command. The newest message
/// timestamp is persisted so messages are handled exactly once.
pub async fn process_messages(ctx: &Context) -> Result<InboxOutcome> {
    let stop_time = *ctx.last_message.lock().await;
    let mut new_last_message = None;
    let mut update_requests: BTreeSet<(String, String)> = BTreeSet::new();
    let mut invites: BTreeSet<String> = BTreeSet::new();
    let mut sleep_after = false;
    let mut outcome = InboxOutcome::default();

    info!("Checking messages");

    for message in ctx.site.inbox().await? {
        if message.created_at.unix_timestamp() <= stop_time {
            break;
        }
        if message.was_comment {
            continue;
        }
        if new_last_message.is_none() {
            new_last_message = Some(message.created_at.unix_timestamp());
        }

        if is_invite(&message) {
            let community = message
                .community
                .clone()
                .unwrap_or_else(|| community_from_subject(&message.subject));
            invites.insert(community.to_lowercase());
            continue;
        }

        let Some(author) = message.author.as_deref() else {
            continue;
        };

        match message.body.trim().to_lowercase().as_str() {
            "update" => {
                let community = community_from_subject(&message.subject).to_lowercase();
                if update_requests.contains(&(community.clone(), author.to_string())) {
                    continue;
                }
                match sender_may_update(ctx, &community, author).await {
                    Ok(true) => {
                        update_requests.insert((community, author.to_string()));
                    }
                    Ok(false) => {
                        send_refusal(ctx, author, &community, "You do not moderate").await;
                    }
                    Err(e) => {
                        warn!("Couldn't check moderators of {community}: {e}");
                        send_refusal(ctx, author, &community, "Unable to access").await;
                    }
                }
            }
            "update_standards" => {
                let community = community_from_subject(&message.subject).to_lowercase();
                match sender_may_update(ctx, &community, author).await {
                    Ok(true) => {
                        if update_standards_from_wiki(ctx, &community, author).await? {
                            outcome.standards_updated = true;
                        }
                    }
                    Ok(false) => {
                        send_refusal(ctx, author, &community, "You do not moderate").await;
                    }
                    Err(e) => {
                        warn!("Couldn't check moderators of {community}: {e}");
                        send_refusal(ctx, author, &community, "Unable to access").await;
                    }
                }
            }
            _ => {
                if message.subject.trim().to_lowercase() == "sleep"
                    && author == ctx.settings.owner_username
                {
                    sleep_after = true;
                }
            }
        }
    }

    for community in invites {
        match ctx.site.accept_invite(&community).await {
            Ok(()) => {
                info!("Accepted moderation invite for {community}");
                outcome.invited.push(community);
            }
            Err(e) => error!("Couldn't accept invite for {community}: {e}"),
        }
    }

    for (community, sender) in update_requests {
        if let Some(conditions) = update_community_from_wiki(ctx, &community, &sender).await? {
            outcome.updated.push((community, conditions));
        }
    }

    if sleep_after {
        info!("Sleeping for {SLEEP_DURATION:?}");
        tokio::time::sleep(SLEEP_DURATION).await;
        info!("Sleep ended, resuming");
    }

    if let Some(last_message) = new_last_message {
        *ctx.last_message.lock().await = last_message;
        let mut settings = ctx.settings.clone();
        settings.last_message = last_message;
        if let Err(e) = settings.save(&ctx.config_dir) {
            warn!("Couldn't persist last_message: {e}");
        }
    }

    Ok(outcome)
}

fn is_invite(message: &Message) -> bool {
    message.author.is_none() && message.subject.starts_with("invitation to moderate")
}

async fn sender_may_update(ctx: &Context, community: &str, sender: &str) -> Result<bool> {
    if sender == ctx.settings.owner_username {
        return Ok(true);
    }
    let moderators = ctx.site.moderators(community).await?;
    Ok(moderators.iter().any(|moderator| moderator == sender))
}

async fn send_refusal(ctx: &Context, user: &str, community: &str, reason: &str) {
    let subject = format!("Error updating from wiki in {community}");
    let body = format!("{reason} {community}");
    if let Err(e) = ctx.site.send_message(user, &subject, &body).await {
        error!("Couldn't send refusal to {user}: {e}");
    }
}
