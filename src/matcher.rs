use crate::context::Context;
use crate::item::{Item, MatchTarget};
use crate::pattern::condition::{
    Condition, MustSatisfy, UserAttribute, UserClause,
};
use crate::site::{SiteClient as _, SiteResult};
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;

/// What the matcher hands to the action executor on success.
#[derive(Clone, Debug, Default)]
pub struct MatchOutcome {
    /// Capture groups of the winning match, full match first. Empty when the
    /// condition matched without any pattern producing a match (e.g. only
    /// inverted keys).
    pub captures: Vec<Option<String>>,
    /// The winning match came from the `user` target. Username rules may
    /// approve shadowbanned users' items.
    pub username_match: bool,
}

lazy_static! {
    static ref LEADING_NON_WORD: Regex = Regex::new(r"^\W+").expect("static regex");
    static ref TRAILING_NON_WORD: Regex = Regex::new(r"\W+$").expect("static regex");
}

/// The item body a condition sees: selftext or comment text, with
/// blockquotes and blank lines dropped if the rule asked for that.
pub fn extracted_body(item: &Item, ignore_blockquotes: bool) -> String {
    let body = item.raw_body();
    if !ignore_blockquotes {
        return body.to_string();
    }
    let unescaped = html_escape::decode_html_entities(body);
    unescaped
        .lines()
        .filter(|line| !line.starts_with('>') && !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Evaluate one compiled condition against one item.
/// `Ok(None)` means the condition does not apply; side effects are the
/// action executor's job. Only user lookups can fail here, and a 404 there
/// means "does not apply" rather than an error.
pub async fn check_item(
    condition: &Condition,
    item: &Item,
    ctx: &Context,
) -> SiteResult<Option<MatchOutcome>> {
    if let Some(threshold) = condition.effective_reports_threshold() {
        if (item.num_reports() as i64) < threshold {
            return Ok(None);
        }
    }

    if let Some(expected) = condition.is_reply {
        if expected != item.is_reply() {
            return Ok(None);
        }
    }

    if let Some(expected) = condition.author_is_submitter {
        if let Item::Comment(comment) = item {
            let author_is_submitter = comment.author.is_some()
                && comment.link_author.as_deref() != Some("[deleted]")
                && comment.author == comment.link_author;
            if expected != author_is_submitter {
                return Ok(None);
            }
        }
    }

    let body = extracted_body(item, condition.ignore_blockquotes);

    if condition.body_min_length.is_some() || condition.body_max_length.is_some() {
        let trimmed = LEADING_NON_WORD.replace(&body, "");
        let trimmed = TRAILING_NON_WORD.replace(&trimmed, "");
        let length = trimmed.chars().count();
        if let Some(min) = condition.body_min_length {
            if length < min {
                return Ok(None);
            }
        }
        if let Some(max) = condition.body_max_length {
            if length > max {
                return Ok(None);
            }
        }
    }

    let mut outcome = MatchOutcome::default();
    let mut recorded = false;
    for check in &condition.checks {
        let mut found: Option<(Vec<Option<String>>, bool)> = None;
        for target in &check.key.targets {
            let text = item.target_text(*target, &body);
            let text = html_escape::decode_html_entities(&text).to_string();
            if let Some(captures) = check.regex.captures(&text) {
                let groups = captures
                    .iter()
                    .map(|group| group.map(|g| g.as_str().to_string()))
                    .collect();
                let username_match = *target == MatchTarget::User && item.author().is_some();
                found = Some((groups, username_match));
                break;
            }
        }

        if found.is_some() != check.expect_match {
            return Ok(None);
        }
        // keep the first successful match for placeholder expansion
        if let Some((groups, username_match)) = found {
            if !recorded {
                outcome.captures = groups;
                outcome.username_match = username_match;
                recorded = true;
            }
        }
    }

    if !check_user_conditions(condition, item, ctx).await? {
        return Ok(None);
    }

    Ok(Some(outcome))
}

/// Evaluate `user_conditions` against the item's author.
/// A deleted author reads as zero for every attribute; a 404 fetching the
/// author fails the whole check.
async fn check_user_conditions(
    condition: &Condition,
    item: &Item,
    ctx: &Context,
) -> SiteResult<bool> {
    let conditions = &condition.user_conditions;
    if conditions.is_empty() {
        return Ok(true);
    }

    let mut user_info = None;
    let now = OffsetDateTime::now_utc();

    let mut any_satisfied = false;
    for clause in &conditions.clauses {
        let value = match clause_value(clause, item, ctx, &mut user_info, now).await? {
            Some(value) => value,
            // shadowbanned or deleted account: never satisfies conditions
            None => return Ok(false),
        };

        let satisfied = clause.op.holds(value, clause.value);
        match conditions.must_satisfy {
            MustSatisfy::Any if satisfied => return Ok(true),
            MustSatisfy::All if !satisfied => return Ok(false),
            _ => {}
        }
        any_satisfied |= satisfied;
    }

    Ok(match conditions.must_satisfy {
        MustSatisfy::All => true,
        // vacuous `any` succeeds; it only fails when clauses exist and none held
        MustSatisfy::Any => conditions.clauses.is_empty() || any_satisfied,
    })
}

/// The author-side value a clause compares against, or `None` if the author
/// 404s.
async fn clause_value(
    clause: &UserClause,
    item: &Item,
    ctx: &Context,
    user_info: &mut Option<crate::user::UserInfo>,
    now: OffsetDateTime,
) -> SiteResult<Option<i64>> {
    let Some(author) = item.author() else {
        // deleted author: every attribute reads as zero
        return Ok(Some(0));
    };

    if clause.attribute == UserAttribute::Rank {
        let rank = ctx.user_rank(item.community(), author).await?;
        return Ok(Some(rank.value()));
    }

    if user_info.is_none() {
        match ctx.site.user_info(author).await {
            Ok(info) => *user_info = Some(info),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    let info = user_info.as_ref().expect("just fetched");

    Ok(Some(match clause.attribute {
        UserAttribute::AccountAge => info.account_age_days(now),
        UserAttribute::CombinedKarma => info.combined_karma(),
        UserAttribute::CommentKarma => info.comment_karma,
        UserAttribute::LinkKarma => info.link_karma,
        UserAttribute::IsGold => info.is_gold as i64,
        UserAttribute::Rank => unreachable!("handled above"),
    }))
}
