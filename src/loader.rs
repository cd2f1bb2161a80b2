use crate::context::Context;
use crate::pattern::condition::Condition;
use crate::pattern::standards::{overlay, StandardsCache};
use crate::pattern::validate::{check_condition, ValidationError};
use crate::site::SiteClient as _;
use crate::store::{CommunityConfig, StandardRow, Store as _};
use anyhow::Result;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use time::OffsetDateTime;
use tracing::info;

/// Recursively lowercase mapping keys, so rule documents are
/// case-insensitive.
fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Mapping(mapping) => {
            let mut lowered = Mapping::new();
            for (key, value) in mapping {
                let key = match key {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                lowered.insert(key, lowercase_keys(value));
            }
            Value::Mapping(lowered)
        }
        other => other,
    }
}

/// Parse a YAML stream into its mapping sections, skipping anything else
/// (scalar or list sections work as comments). Sections are numbered from 1
/// across the whole stream for error reporting.
fn mapping_sections(document: &str) -> Result<Vec<(usize, Mapping)>, ValidationError> {
    let mut sections = Vec::new();
    for (index, section) in serde_yaml::Deserializer::from_str(document).enumerate() {
        let section_num = index + 1;
        let value = Value::deserialize(section).map_err(|e| {
            ValidationError::new(section_num, format!("syntax invalid: {e}"))
        })?;
        let Value::Mapping(_) = value else {
            continue;
        };
        let Value::Mapping(mapping) = lowercase_keys(value) else {
            unreachable!("lowercasing preserves mappings");
        };
        sections.push((section_num, mapping));
    }
    Ok(sections)
}

/// Resolve a section's `standard` reference, overlay it, validate the
/// result, and compile. `yaml_source` serializes the section as written so
/// standards edits don't change rules' idempotence keys.
async fn build_condition(
    section_num: usize,
    mapping: &Mapping,
    standards: &StandardsCache,
) -> Result<Condition, ValidationError> {
    let yaml_source = serde_yaml::to_string(mapping)
        .map_err(|e| ValidationError::new(section_num, e.to_string()))?;

    let resolved = match mapping.get("standard") {
        None => mapping.clone(),
        Some(Value::String(name)) => {
            let Some(fragment) = standards.get(name).await else {
                return Err(ValidationError::new(
                    section_num,
                    format!("invalid standard condition: `{name}`"),
                ));
            };
            overlay(&fragment, mapping)
        }
        Some(_) => {
            return Err(ValidationError::new(section_num, "standard must be a string"))
        }
    };

    check_condition(&resolved).map_err(|message| ValidationError::new(section_num, message))?;

    Condition::build(yaml_source, &resolved)
        .map_err(|e| ValidationError::new(section_num, e.to_string()))
}

/// Compile a whole rule document. Any bad section rejects the entire
/// document, leaving the community's published rules untouched.
pub async fn load_rule_document(
    document: &str,
    standards: &StandardsCache,
) -> Result<Vec<Condition>, ValidationError> {
    let mut conditions = Vec::new();
    for (section_num, mapping) in mapping_sections(document)? {
        conditions.push(build_condition(section_num, &mapping, standards).await?);
    }
    Ok(conditions)
}

/// Parse a standards document into named rows. Every section must carry a
/// `name`; the rest of the section must compile as a condition so broken
/// standards are rejected at ingest rather than at inheritance time.
pub async fn load_standards_document(
    document: &str,
    standards: &StandardsCache,
) -> Result<Vec<StandardRow>, ValidationError> {
    let mut rows = Vec::new();
    for (section_num, mut mapping) in mapping_sections(document)? {
        let Some(name) = mapping.remove("name") else {
            return Err(ValidationError::new(
                section_num,
                "unnamed standard: you must specify a `name` for standard conditions",
            ));
        };
        let Value::String(name) = name else {
            return Err(ValidationError::new(section_num, "name must be a string"));
        };

        let condition = build_condition(section_num, &mapping, standards).await?;
        rows.push(StandardRow {
            name,
            yaml: condition.yaml_source,
        });
    }
    Ok(rows)
}

/// Tell a submitter their wiki update failed, with a pointer back to the
/// page that failed.
async fn send_error_message(ctx: &Context, user: &str, community: &str, error: &str) {
    let subject = format!("Error updating from wiki in {community}");
    let body = format!(
        "### Error updating from [wiki configuration in {community}]\
         ({base}c/{community}/wiki/{page}):\n\n---\n\n{error}",
        base = ctx.settings.base_url,
        page = ctx.settings.wiki_page,
    );
    if let Err(e) = ctx.site.send_message(user, &subject, &body).await {
        tracing::error!("Couldn't send error message to {user}: {e}");
    }
}

/// Re-ingest a community's rule document from its wiki page.
/// Returns the compiled conditions for publication, or `None` if the update
/// failed and the submitter was told why.
pub async fn update_community_from_wiki(
    ctx: &Context,
    community: &str,
    requester: &str,
) -> Result<Option<Vec<Condition>>> {
    let page = match ctx
        .site
        .wiki_page(community, &ctx.settings.wiki_page)
        .await
    {
        Ok(page) => page,
        Err(_) => {
            send_error_message(
                ctx,
                requester,
                community,
                &format!(
                    "The wiki page could not be accessed. Please ensure the page exists \
                     and that {username} has wiki permission to be able to access it.",
                    username = ctx.settings.username,
                ),
            )
            .await;
            return Ok(None);
        }
    };
    let content = html_escape::decode_html_entities(&page).to_string();

    let conditions = match load_rule_document(&content, &ctx.standards).await {
        Ok(conditions) => conditions,
        Err(e) => {
            send_error_message(ctx, requester, community, &e.to_string()).await;
            return Ok(None);
        }
    };

    let mut config = match ctx.store.community(community).await? {
        Some(config) => config,
        None => CommunityConfig::new(community.to_string(), OffsetDateTime::now_utc()),
    };
    config.conditions_yaml = content;
    ctx.store.upsert_community(&config).await?;

    let confirmation = format!(
        "{username}'s conditions were successfully updated for {community}",
        username = ctx.settings.username,
    );
    ctx.site
        .send_message(
            requester,
            &format!("{username} conditions updated", username = ctx.settings.username),
            &confirmation,
        )
        .await?;

    info!("Updated rules for {community} from wiki");
    Ok(Some(conditions))
}

/// Re-ingest the standard-conditions catalog from the standards community's
/// wiki. On success the standards cache is flagged so the next poll cycle
/// rebuilds every rule set.
pub async fn update_standards_from_wiki(
    ctx: &Context,
    community: &str,
    requester: &str,
) -> Result<bool> {
    if !community.eq_ignore_ascii_case(&ctx.settings.standards_community) {
        send_error_message(
            ctx,
            requester,
            community,
            &format!(
                "{username} is not configured to read standard conditions from \
                 {community}. Please contact {owner} for assistance.",
                username = ctx.settings.username,
                owner = ctx.settings.owner_username,
            ),
        )
        .await;
        return Ok(false);
    }

    let page = match ctx
        .site
        .wiki_page(community, &ctx.settings.standards_wiki_page)
        .await
    {
        Ok(page) => page,
        Err(_) => {
            send_error_message(
                ctx,
                requester,
                community,
                "The standards wiki page could not be accessed.",
            )
            .await;
            return Ok(false);
        }
    };
    let content = html_escape::decode_html_entities(&page).to_string();

    let rows = match load_standards_document(&content, &ctx.standards).await {
        Ok(rows) => rows,
        Err(e) => {
            send_error_message(ctx, requester, community, &e.to_string()).await;
            return Ok(false);
        }
    };

    for row in &rows {
        ctx.store.upsert_standard(row).await?;
    }
    ctx.standards.require_update().await;

    ctx.site
        .send_message(
            requester,
            &format!("{username} standards updated", username = ctx.settings.username),
            &format!(
                "{username}'s standards were successfully updated from {community}",
                username = ctx.settings.username,
            ),
        )
        .await?;

    info!("Updated standard conditions from {community}");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::execute_actions;
    use crate::item::test_fixtures::submission;
    use crate::item::Item;
    use crate::matcher::check_item;
    use crate::pattern::condition::{Action, ConditionType};
    use crate::testutil::{test_context, FakeSite};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stream_parse_skips_non_mappings() {
        let standards = StandardsCache::new();
        let document = "\
just a comment section
---
type: submission
domain: example.com
action: remove
---
- a
- list
---
body: [spam]
action: spam
";
        let conditions = load_rule_document(document, &standards)
            .await
            .expect("Couldn't load document");
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].action, Some(Action::Remove));
        assert_eq!(conditions[1].action, Some(Action::Spam));
    }

    #[tokio::test]
    async fn test_keys_lowercased_on_ingest() {
        let standards = StandardsCache::new();
        let conditions = load_rule_document("Type: submission\nDOMAIN: example.com\n", &standards)
            .await
            .expect("Couldn't load document");
        assert_eq!(conditions[0].condition_type, ConditionType::Submission);
        assert_eq!(conditions[0].checks.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_section_rejects_whole_document_with_index() {
        let standards = StandardsCache::new();
        let document = "body: [ok]\n---\nbogus_key: [x]\n";
        let error = load_rule_document(document, &standards)
            .await
            .expect_err("should fail");
        assert_eq!(error.section, 2);
        assert!(error.message.contains("bogus_key"));
    }

    #[tokio::test]
    async fn test_invalid_regex_rejects_document() {
        let standards = StandardsCache::new();
        let document = "body: ['(unclosed']\nmodifiers: [regex]\n";
        let error = load_rule_document(document, &standards)
            .await
            .expect_err("should fail");
        assert_eq!(error.section, 1);
    }

    #[tokio::test]
    async fn test_missing_standard_fails_validation() {
        let standards = StandardsCache::new();
        let error = load_rule_document("standard: nonexistent\n", &standards)
            .await
            .expect_err("should fail");
        assert!(error.message.contains("invalid standard condition"));
    }

    #[tokio::test]
    async fn test_standard_inheritance_and_overlay() {
        let standards = StandardsCache::new();
        standards
            .refresh(vec![StandardRow {
                name: "bad-words".to_string(),
                yaml: "body: ['foo', 'bar']\naction: remove\n".to_string(),
            }])
            .await;

        let document =
            "standard: bad-words\naction: report\nreport_reason: 'flagged {{match-1}}'\n";
        let conditions = load_rule_document(document, &standards)
            .await
            .expect("Couldn't load document");
        let condition = &conditions[0];

        // the standard contributes the body pattern; the rule wins on action
        assert_eq!(condition.checks.len(), 1);
        assert_eq!(condition.action, Some(Action::Report));
        assert_eq!(condition.report_reason.as_deref(), Some("flagged {{match-1}}"));
        // the idempotence key is the rule as written, not the overlay
        assert!(condition.yaml_source.contains("standard"));
        assert!(!condition.yaml_source.contains("foo"));

        // end to end: the inherited pattern reports with the expanded reason
        let site = Arc::new(FakeSite::default());
        let ctx = test_context(site.clone());
        let mut s = submission("s1");
        s.selftext = "contains foo today".to_string();
        let item = Item::Submission(s);
        let outcome = check_item(condition, &item, &ctx)
            .await
            .expect("check failed")
            .expect("should match");
        execute_actions(condition, &item, &outcome, &ctx, false)
            .await
            .expect("execute failed");
        assert_eq!(site.calls(), vec!["report t3_s1 reason=flagged foo"]);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_condition_semantics() {
        let standards = StandardsCache::new();
        let document = "\
type: submission
priority: 3
'~title#promo': [crypto, nft]
domain: example.com
action: remove
modifiers:
  '~title#promo': [case-sensitive]
";
        let first = &load_rule_document(document, &standards)
            .await
            .expect("Couldn't load document")[0];
        let second = &load_rule_document(&first.yaml_source, &standards)
            .await
            .expect("Couldn't reload document")[0];

        assert_eq!(first.condition_type, second.condition_type);
        assert_eq!(first.priority, second.priority);
        assert_eq!(first.action, second.action);
        assert_eq!(first.checks.len(), second.checks.len());
        for (a, b) in first.checks.iter().zip(second.checks.iter()) {
            assert_eq!(a.regex.as_str(), b.regex.as_str());
            assert_eq!(a.expect_match, b.expect_match);
        }
        assert_eq!(first.yaml_source, second.yaml_source);
    }

    #[tokio::test]
    async fn test_standards_document_requires_names() {
        let standards = StandardsCache::new();
        let document = "name: bad-words\nbody: [foo]\naction: remove\n";
        let rows = load_standards_document(document, &standards)
            .await
            .expect("Couldn't load standards");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "bad-words");
        assert!(rows[0].yaml.contains("body"));
        assert!(!rows[0].yaml.contains("name"));

        let error = load_standards_document("body: [foo]\n", &standards)
            .await
            .expect_err("should fail");
        assert!(error.message.contains("unnamed standard"));
    }
}
