use crate::context::Context;
use crate::item::Item;
use crate::matcher::MatchOutcome;
use crate::pattern::condition::{Action, Condition, ThreadOption};
use crate::site::SiteClient as _;
use crate::store::{ActionLogEntry, Store as _};
use crate::template::{expand, truncate, MAX_BODY_LEN, MAX_SUBJECT_LEN};
use anyhow::Result;
use time::OffsetDateTime;
use tracing::info;

/// Perform a matched condition's actions against the item, then append one
/// log row per distinct action name. Log rows are written after the external
/// effects on purpose: re-entry after a crash consults the log and skips
/// what already happened.
///
/// `check_shadowbanned` is set by the dispatcher for spam-queue walks in
/// communities that don't exclude shadowbanned users' items.
pub async fn execute_actions(
    condition: &Condition,
    item: &Item,
    outcome: &MatchOutcome,
    ctx: &Context,
    check_shadowbanned: bool,
) -> Result<()> {
    // Approving a spam-queue item authored by a shadowbanned user would
    // unhide it. Username rules are the deliberate exception.
    if condition.action == Some(Action::Approve)
        && condition.report.is_none()
        && check_shadowbanned
        && !outcome.username_match
    {
        if let Some(author) = item.author() {
            if ctx.site.user_is_shadowbanned(author).await? {
                return Ok(());
            }
        }
    }

    let fullname = item.fullname();
    let captures = &outcome.captures;

    let mut log_actions: Vec<Option<String>> =
        if condition.action.is_some() || condition.sends_messages() {
            vec![condition
                .action
                .map(|action| action.as_str().to_string())]
        } else if condition.report.is_some() {
            vec![Some(Action::Report.as_str().to_string())]
        } else {
            vec![]
        };

    match condition.action {
        Some(Action::Remove) => ctx.site.remove(&fullname, false).await?,
        Some(Action::Spam) => ctx.site.remove(&fullname, true).await?,
        Some(Action::Approve) => ctx.site.approve(&fullname).await?,
        Some(Action::Report) | None => {}
    }

    if condition.produces_report() {
        let template = condition
            .report_reason
            .as_deref()
            .or(condition.report.as_deref());
        let reason =
            template.map(|template| truncate(&expand(template, item, captures), MAX_SUBJECT_LEN));
        ctx.site.report(&fullname, reason.as_deref()).await?;
    }

    if let Item::Submission(submission) = item {
        if condition.set_options.contains(&ThreadOption::Nsfw) && !submission.over_18 {
            ctx.site.mark_nsfw(&fullname).await?;
        }
        if condition.set_options.contains(&ThreadOption::Contest) {
            ctx.site.set_contest_mode(&fullname).await?;
        }
        if condition.set_options.contains(&ThreadOption::Sticky) {
            ctx.site.set_sticky(&fullname).await?;
        }

        if condition.sets_link_flair()
            && submission.link_flair_text.is_empty()
            && submission.link_flair_css_class.is_empty()
        {
            let text = expand(&condition.link_flair_text, item, captures);
            let css_class = expand(&condition.link_flair_class, item, captures).to_lowercase();
            ctx.site.set_link_flair(&fullname, &text, &css_class).await?;
            log_actions.push(Some("link_flair".to_string()));
        }
    }

    if condition.sets_user_flair() {
        let existing_flair =
            !item.author_flair_text().is_empty() || !item.author_flair_css_class().is_empty();
        if let Some(author) = item.author() {
            if !existing_flair || condition.overwrite_user_flair {
                let text = expand(&condition.user_flair_text, item, captures);
                let css_class =
                    expand(&condition.user_flair_class, item, captures).to_lowercase();
                ctx.site
                    .set_user_flair(item.community(), author, &text, &css_class)
                    .await?;
                log_actions.push(Some("user_flair".to_string()));
            }
        }
    }

    if let Some(comment) = condition.comment.as_deref() {
        let body = build_message(comment, item, captures, ctx, true, false);
        let comment_fullname = ctx.site.reply(&fullname, &body).await?;
        ctx.site.distinguish(&comment_fullname).await?;
    }

    if let Some(modmail) = condition.modmail.as_deref() {
        let body = build_message(modmail, item, captures, ctx, false, true);
        let subject = truncate(
            &expand(&condition.modmail_subject, item, captures),
            MAX_SUBJECT_LEN,
        );
        ctx.site
            .send_modmail(item.community(), &subject, &body)
            .await?;
    }

    if let Some(message) = condition.message.as_deref() {
        if let Some(author) = item.author() {
            let body = build_message(message, item, captures, ctx, true, true);
            let subject = truncate(
                &expand(&condition.message_subject, item, captures),
                MAX_SUBJECT_LEN,
            );
            ctx.site.send_message(author, &subject, &body).await?;
        }
    }

    let now = OffsetDateTime::now_utc();
    for action in &log_actions {
        ctx.store
            .append_action(&ActionLogEntry {
                item_fullname: fullname.clone(),
                condition_yaml: condition.yaml_source.clone(),
                action: action.clone(),
                timestamp: now,
            })
            .await?;
    }

    info!(
        "Matched {permalink}, actions: {log_actions:?} (age: {age})",
        permalink = item.permalink(),
        age = now - item.created_at(),
    );

    Ok(())
}

/// Build a comment or message body: append the configured disclaimer, make
/// sure a permalink is present when one is expected, expand placeholders,
/// and cap the length.
fn build_message(
    text: &str,
    item: &Item,
    captures: &[Option<String>],
    ctx: &Context,
    disclaimer: bool,
    permalink: bool,
) -> String {
    let mut message = text.to_string();
    if disclaimer && !ctx.settings.disclaimer.is_empty() {
        message = format!("{message}\n\n{disclaimer}", disclaimer = ctx.settings.disclaimer);
    }
    if permalink && !message.contains("{{permalink}}") {
        message = format!("{{{{permalink}}}}\n\n{message}");
    }
    truncate(&expand(&message, item, captures), MAX_BODY_LEN)
}
