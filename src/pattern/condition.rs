use crate::config::CLIENT_NAME;
use crate::item::ItemKind;
use crate::pattern::compiler::{
    build_pattern, coerce_values, compile_pattern, MatchKey, ModifierToken, ModifiersSpec,
};
use anyhow::{anyhow, bail, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeSet;

/// What kind of item a condition applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionType {
    Submission,
    Comment,
    Both,
}

impl ConditionType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "submission" => Self::Submission,
            "comment" => Self::Comment,
            "both" => Self::Both,
            _ => return None,
        })
    }

    pub fn applies_to(&self, kind: ItemKind) -> bool {
        match self {
            Self::Both => true,
            Self::Submission => kind == ItemKind::Submission,
            Self::Comment => kind == ItemKind::Comment,
        }
    }
}

/// The single moderation action a condition may take.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Approve,
    Remove,
    Spam,
    Report,
}

impl Action {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "approve" => Self::Approve,
            "remove" => Self::Remove,
            "spam" => Self::Spam,
            "report" => Self::Report,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Remove => "remove",
            Self::Spam => "spam",
            Self::Report => "report",
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Remove | Self::Spam)
    }
}

/// Thread-level toggles on a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreadOption {
    Nsfw,
    Contest,
    Sticky,
}

impl ThreadOption {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "nsfw" => Self::Nsfw,
            "contest" => Self::Contest,
            "sticky" => Self::Sticky,
            _ => return None,
        })
    }
}

/// One compiled match key: the pattern, and whether matching is success.
#[derive(Clone, Debug)]
pub struct MatchCheck {
    pub key: MatchKey,
    pub regex: Regex,
    pub expect_match: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Gt,
    Eq,
}

impl CmpOp {
    pub fn holds(&self, left: i64, right: i64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Gt => left > right,
            Self::Eq => left == right,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserAttribute {
    AccountAge,
    CombinedKarma,
    CommentKarma,
    LinkKarma,
    IsGold,
    Rank,
}

/// One clause of `user_conditions`, e.g. `account_age: "< 7"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserClause {
    pub attribute: UserAttribute,
    pub op: CmpOp,
    pub value: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MustSatisfy {
    Any,
    #[default]
    All,
}

#[derive(Clone, Debug, Default)]
pub struct UserConditions {
    pub must_satisfy: MustSatisfy,
    pub clauses: Vec<UserClause>,
}

impl UserConditions {
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

lazy_static! {
    static ref OPERATOR_PREFIX: Regex = Regex::new(r"^(==?|<|>) ").expect("static regex");
}

/// Split an optional comparison-operator prefix off a user-condition value.
/// `==` normalizes to `=`; the default is equality.
fn split_operator(s: &str) -> (CmpOp, &str) {
    match OPERATOR_PREFIX.find(s) {
        Some(found) => {
            let op = match found.as_str().trim_end() {
                "<" => CmpOp::Lt,
                ">" => CmpOp::Gt,
                _ => CmpOp::Eq,
            };
            (op, s[found.end()..].trim())
        }
        None => (CmpOp::Eq, s),
    }
}

fn parse_user_conditions(mapping: &Mapping) -> Result<UserConditions> {
    let mut conditions = UserConditions::default();
    for (key, value) in mapping {
        let Value::String(key) = key else {
            bail!("user_conditions keys must be strings");
        };
        if key == "must_satisfy" {
            conditions.must_satisfy = match value.as_str() {
                Some("any") => MustSatisfy::Any,
                Some("all") => MustSatisfy::All,
                _ => bail!("must_satisfy must be `any` or `all`"),
            };
            continue;
        }
        let attribute = match key.as_str() {
            "account_age" => UserAttribute::AccountAge,
            "combined_karma" => UserAttribute::CombinedKarma,
            "comment_karma" => UserAttribute::CommentKarma,
            "link_karma" => UserAttribute::LinkKarma,
            "is_gold" => UserAttribute::IsGold,
            "rank" => UserAttribute::Rank,
            _ => bail!("invalid user_conditions variable: `{key}`"),
        };
        let clause = match (attribute, value) {
            (UserAttribute::IsGold, Value::Bool(b)) => UserClause {
                attribute,
                op: CmpOp::Eq,
                value: *b as i64,
            },
            (UserAttribute::Rank, Value::String(s)) => {
                let (op, rank) = split_operator(s);
                let rank = crate::user::Rank::parse(rank)
                    .ok_or_else(|| anyhow!("invalid rank: `{s}`"))?;
                UserClause {
                    attribute,
                    op,
                    value: rank.value(),
                }
            }
            (_, Value::String(s)) => {
                let (op, number) = split_operator(s);
                UserClause {
                    attribute,
                    op,
                    value: number.parse()?,
                }
            }
            (_, Value::Number(n)) => UserClause {
                attribute,
                op: CmpOp::Eq,
                value: n.as_i64().ok_or_else(|| anyhow!("invalid number: {n}"))?,
            },
            _ => bail!("invalid user_conditions value for `{key}`"),
        };
        conditions.clauses.push(clause);
    }
    Ok(conditions)
}

/// A compiled moderation rule. Immutable after construction.
#[derive(Clone, Debug)]
pub struct Condition {
    /// Canonical serialization of the originating YAML fragment. Used as the
    /// idempotence key in the action log.
    pub yaml_source: String,
    pub condition_type: ConditionType,
    pub priority: i64,
    pub reports_threshold: Option<i64>,
    pub is_reply: Option<bool>,
    pub author_is_submitter: Option<bool>,
    pub ignore_blockquotes: bool,
    pub moderators_exempt: bool,
    pub body_min_length: Option<usize>,
    pub body_max_length: Option<usize>,
    /// Compiled match keys in YAML insertion order; all must succeed.
    pub checks: Vec<MatchCheck>,
    pub user_conditions: UserConditions,
    pub action: Option<Action>,
    pub report: Option<String>,
    pub report_reason: Option<String>,
    pub comment: Option<String>,
    pub modmail: Option<String>,
    pub modmail_subject: String,
    pub message: Option<String>,
    pub message_subject: String,
    pub link_flair_text: String,
    pub link_flair_class: String,
    pub user_flair_text: String,
    pub user_flair_class: String,
    pub overwrite_user_flair: bool,
    pub set_options: BTreeSet<ThreadOption>,
}

fn get_str(values: &Mapping, key: &str) -> Result<Option<String>> {
    match values.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => bail!("{key} must be a string"),
    }
}

fn get_bool(values: &Mapping, key: &str) -> Result<Option<bool>> {
    match values.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => bail!("{key} must be a boolean"),
    }
}

fn get_int(values: &Mapping, key: &str) -> Result<Option<i64>> {
    match values.get(key) {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| anyhow!("{key} must be an integer")),
        // the validator accepts numeric strings too
        Some(Value::String(s)) => Ok(Some(s.trim().parse()?)),
        Some(_) => bail!("{key} must be an integer"),
    }
}

fn default_subject() -> String {
    format!("{CLIENT_NAME} notification")
}

impl Condition {
    /// Build a compiled condition from a lowercased, validated, and
    /// standard-overlaid rule mapping. `yaml_source` is the serialization of
    /// the fragment as the rule author wrote it.
    pub fn build(yaml_source: String, values: &Mapping) -> Result<Self> {
        let modifiers = match values.get("modifiers") {
            Some(value) => ModifiersSpec::from_value(value)?,
            None => ModifiersSpec::default(),
        };

        let mut checks = Vec::new();
        let mut match_targets = BTreeSet::new();
        for (key, value) in values {
            let Value::String(key) = key else {
                bail!("rule keys must be strings");
            };
            let Some(match_key) = MatchKey::parse(key) else {
                continue;
            };

            let mut tokens = Vec::new();
            for raw_token in modifiers.tokens_for(key) {
                let token = ModifierToken::parse(&raw_token)
                    .ok_or_else(|| anyhow!("invalid modifier: `{raw_token}`"))?;
                tokens.push(token);
            }

            let match_values = coerce_values(value)?;
            let source = build_pattern(&match_key, &match_values, &tokens);
            let case_sensitive = tokens.contains(&ModifierToken::CaseSensitive);
            let regex = compile_pattern(&source, case_sensitive)?;
            let expect_match =
                !(match_key.inverted || tokens.contains(&ModifierToken::Inverse));

            match_targets.extend(match_key.targets.iter().copied());
            checks.push(MatchCheck {
                key: match_key,
                regex,
                expect_match,
            });
        }

        let condition_type = match get_str(values, "type")? {
            Some(s) => {
                ConditionType::parse(&s).ok_or_else(|| anyhow!("invalid type: `{s}`"))?
            }
            None => {
                if !match_targets.is_empty()
                    && match_targets.iter().all(|target| target.submission_only())
                {
                    ConditionType::Submission
                } else {
                    ConditionType::Both
                }
            }
        };

        let action = match get_str(values, "action")? {
            Some(s) => Some(Action::parse(&s).ok_or_else(|| anyhow!("invalid action: `{s}`"))?),
            None => None,
        };

        let mut set_options = BTreeSet::new();
        match values.get("set_options") {
            None => {}
            Some(value) => {
                let tokens = match value {
                    Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
                    Value::Sequence(seq) => seq
                        .iter()
                        .map(|option| {
                            option
                                .as_str()
                                .map(str::to_string)
                                .ok_or_else(|| anyhow!("set_options entries must be strings"))
                        })
                        .collect::<Result<Vec<_>>>()?,
                    _ => bail!("set_options must be a string or list"),
                };
                for token in tokens {
                    let option = ThreadOption::parse(&token)
                        .ok_or_else(|| anyhow!("invalid set_options value: `{token}`"))?;
                    set_options.insert(option);
                }
            }
        }

        let user_conditions = match values.get("user_conditions") {
            None => UserConditions::default(),
            Some(Value::Mapping(mapping)) => parse_user_conditions(mapping)?,
            Some(_) => bail!("user_conditions must be a mapping"),
        };

        Ok(Self {
            yaml_source,
            condition_type,
            priority: get_int(values, "priority")?.unwrap_or(0),
            reports_threshold: get_int(values, "reports")?,
            is_reply: get_bool(values, "is_reply")?,
            author_is_submitter: get_bool(values, "author_is_submitter")?,
            ignore_blockquotes: get_bool(values, "ignore_blockquotes")?.unwrap_or(false),
            moderators_exempt: get_bool(values, "moderators_exempt")?.unwrap_or(true),
            body_min_length: get_int(values, "body_min_length")?.map(|n| n.max(0) as usize),
            body_max_length: get_int(values, "body_max_length")?.map(|n| n.max(0) as usize),
            checks,
            user_conditions,
            action,
            report: get_str(values, "report")?,
            report_reason: get_str(values, "report_reason")?,
            comment: get_str(values, "comment")?,
            modmail: get_str(values, "modmail")?,
            modmail_subject: get_str(values, "modmail_subject")?.unwrap_or_else(default_subject),
            message: get_str(values, "message")?,
            message_subject: get_str(values, "message_subject")?.unwrap_or_else(default_subject),
            link_flair_text: get_str(values, "link_flair_text")?.unwrap_or_default(),
            link_flair_class: get_str(values, "link_flair_class")?.unwrap_or_default(),
            user_flair_text: get_str(values, "user_flair_text")?.unwrap_or_default(),
            user_flair_class: get_str(values, "user_flair_class")?.unwrap_or_default(),
            overwrite_user_flair: get_bool(values, "overwrite_user_flair")?.unwrap_or(false),
            set_options,
        })
    }

    /// A reports threshold of zero is no threshold at all.
    pub fn effective_reports_threshold(&self) -> Option<i64> {
        self.reports_threshold.filter(|threshold| *threshold != 0)
    }

    pub fn sets_link_flair(&self) -> bool {
        !self.link_flair_text.is_empty() || !self.link_flair_class.is_empty()
    }

    pub fn sets_user_flair(&self) -> bool {
        !self.user_flair_text.is_empty() || !self.user_flair_class.is_empty()
    }

    pub fn sends_messages(&self) -> bool {
        self.comment.is_some() || self.modmail.is_some() || self.message.is_some()
    }

    /// True when matching produces a report, either as the primary action or
    /// in addition to it.
    pub fn produces_report(&self) -> bool {
        self.action == Some(Action::Report) || self.report.is_some()
    }

    /// Number of independent remote effects this condition performs on match.
    /// Used as a secondary sort key so cheap rules run first among equals.
    pub fn requests_required(&self) -> usize {
        let mut requests = [
            self.action.is_some(),
            self.report.is_some(),
            !self.user_conditions.is_empty(),
            self.comment.is_some(),
            self.modmail.is_some(),
            self.message.is_some(),
            self.sets_user_flair(),
            self.sets_link_flair(),
        ]
        .into_iter()
        .filter(|required| *required)
        .count();

        // posting a comment takes a second call to distinguish it
        if self.comment.is_some() {
            requests += 1;
        }

        requests + self.set_options.len()
    }
}

/// Test helper: build a condition straight from a YAML fragment, bypassing
/// the loader's validation and standards overlay.
#[cfg(test)]
pub(crate) fn condition_from_yaml(yaml: &str) -> Condition {
    let values: Mapping = serde_yaml::from_str(yaml).expect("Couldn't parse YAML");
    Condition::build(yaml.to_string(), &values).expect("Couldn't build condition")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_inferred_from_submission_only_targets() {
        let condition = condition_from_yaml("domain: example.com\naction: remove\n");
        assert_eq!(condition.condition_type, ConditionType::Submission);

        let condition = condition_from_yaml("body: [spam]\naction: remove\n");
        assert_eq!(condition.condition_type, ConditionType::Both);

        let condition = condition_from_yaml("type: comment\ndomain: example.com\n");
        assert_eq!(condition.condition_type, ConditionType::Comment);
    }

    #[test]
    fn test_checks_preserve_insertion_order() {
        let condition =
            condition_from_yaml("title: [alpha]\nbody: [beta]\n'~domain#x': example.com\n");
        let keys: Vec<&str> = condition
            .checks
            .iter()
            .map(|check| check.key.raw.as_str())
            .collect();
        assert_eq!(keys, vec!["title", "body", "~domain#x"]);
        assert!(condition.checks[2].key.inverted);
        assert!(!condition.checks[2].expect_match);
    }

    #[test]
    fn test_requests_required() {
        let condition = condition_from_yaml(
            "domain: example.com\naction: remove\ncomment: gone\nset_options: [nsfw, sticky]\n",
        );
        // action + comment + distinguish + two thread options
        assert_eq!(condition.requests_required(), 5);

        let condition = condition_from_yaml("body: [spam]\n");
        assert_eq!(condition.requests_required(), 0);
    }

    #[test]
    fn test_inverse_modifier_flips_expectation() {
        let condition =
            condition_from_yaml("body: [ok]\nmodifiers:\n  body: [inverse]\n");
        assert!(!condition.checks[0].expect_match);
    }

    #[test]
    fn test_user_conditions_parse() {
        let condition = condition_from_yaml(
            "body: [x]\nuser_conditions:\n  account_age: '< 7'\n  rank: moderator\n  is_gold: true\n  must_satisfy: any\n",
        );
        let conditions = &condition.user_conditions;
        assert_eq!(conditions.must_satisfy, MustSatisfy::Any);
        assert_eq!(conditions.clauses.len(), 3);
        assert_eq!(
            conditions.clauses[0],
            UserClause {
                attribute: UserAttribute::AccountAge,
                op: CmpOp::Lt,
                value: 7,
            }
        );
        assert_eq!(
            conditions.clauses[1],
            UserClause {
                attribute: UserAttribute::Rank,
                op: CmpOp::Eq,
                value: 2,
            }
        );
        assert_eq!(
            conditions.clauses[2],
            UserClause {
                attribute: UserAttribute::IsGold,
                op: CmpOp::Eq,
                value: 1,
            }
        );
    }

    #[test]
    fn test_double_equals_normalizes() {
        let (op, rest) = split_operator("== 10");
        assert_eq!(op, CmpOp::Eq);
        assert_eq!(rest, "10");

        let (op, rest) = split_operator("-5");
        assert_eq!(op, CmpOp::Eq);
        assert_eq!(rest, "-5");
    }

    #[test]
    fn test_zero_reports_threshold_is_ignored() {
        let condition = condition_from_yaml("body: [x]\nreports: 0\n");
        assert_eq!(condition.effective_reports_threshold(), None);

        let condition = condition_from_yaml("body: [x]\nreports: 2\n");
        assert_eq!(condition.effective_reports_threshold(), Some(2));
    }
}
