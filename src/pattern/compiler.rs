use crate::item::MatchTarget;
use anyhow::{anyhow, bail, Result};
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Generous but bounded: user-authored alternations should never need more,
/// and anything bigger rejects the rule set through the validation path.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// How a value is anchored within the target string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchType {
    FullExact,
    FullText,
    Includes,
    IncludesWord,
    StartsWith,
    EndsWith,
}

impl MatchType {
    pub const ALL: [MatchType; 6] = [
        MatchType::FullExact,
        MatchType::FullText,
        MatchType::Includes,
        MatchType::IncludesWord,
        MatchType::StartsWith,
        MatchType::EndsWith,
    ];

    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "full-exact" => Self::FullExact,
            "full-text" => Self::FullText,
            "includes" => Self::Includes,
            "includes-word" => Self::IncludesWord,
            "starts-with" => Self::StartsWith,
            "ends-with" => Self::EndsWith,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullExact => "full-exact",
            Self::FullText => "full-text",
            Self::Includes => "includes",
            Self::IncludesWord => "includes-word",
            Self::StartsWith => "starts-with",
            Self::EndsWith => "ends-with",
        }
    }

    fn apply(&self, group: &str) -> String {
        match self {
            Self::FullExact => format!("^{group}$"),
            Self::FullText => format!(r"^\W*{group}\W*$"),
            Self::Includes => group.to_string(),
            Self::IncludesWord => format!(r"(?:^|\W|\b){group}(?:$|\W|\b)"),
            Self::StartsWith => format!("^{group}"),
            Self::EndsWith => format!("{group}$"),
        }
    }

    /// Anchoring used when a key names this single target and its modifiers
    /// don't pick one explicitly.
    fn default_for(target: MatchTarget) -> Self {
        match target {
            MatchTarget::LinkId
            | MatchTarget::ParentCommentId
            | MatchTarget::User
            | MatchTarget::Domain
            | MatchTarget::MediaUser
            | MatchTarget::AuthorFlairText
            | MatchTarget::AuthorFlairCssClass => Self::FullExact,
            MatchTarget::Url | MatchTarget::MediaAuthorUrl | MatchTarget::LinkUrl => {
                Self::Includes
            }
            _ => Self::IncludesWord,
        }
    }
}

/// One token from a rule's `modifiers` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModifierToken {
    Match(MatchType),
    CaseSensitive,
    Regex,
    Inverse,
}

impl ModifierToken {
    pub fn parse(token: &str) -> Option<Self> {
        if let Some(match_type) = MatchType::parse(token) {
            return Some(Self::Match(match_type));
        }
        Some(match token {
            "case-sensitive" => Self::CaseSensitive,
            "regex" => Self::Regex,
            "inverse" => Self::Inverse,
            _ => return None,
        })
    }
}

/// A rule's `modifiers` field: either one token list applied to every match
/// key, or a per-key mapping.
#[derive(Clone, Debug, PartialEq)]
pub enum ModifiersSpec {
    Global(Vec<String>),
    PerKey(BTreeMap<String, Vec<String>>),
}

impl Default for ModifiersSpec {
    fn default() -> Self {
        Self::Global(vec![])
    }
}

impl ModifiersSpec {
    /// YAML shapes accepted: a string (whitespace-split), a list of strings,
    /// or a mapping from match key to either of those.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(_) | Value::Sequence(_) => Ok(Self::Global(token_list(value)?)),
            Value::Mapping(mapping) => {
                let mut per_key = BTreeMap::new();
                for (key, tokens) in mapping {
                    let Value::String(key) = key else {
                        bail!("modifiers mapping keys must be strings");
                    };
                    per_key.insert(key.clone(), token_list(tokens)?);
                }
                Ok(Self::PerKey(per_key))
            }
            _ => bail!("modifiers must be a string, list, or mapping"),
        }
    }

    pub fn tokens_for(&self, key: &str) -> Vec<String> {
        match self {
            Self::Global(tokens) => tokens.clone(),
            Self::PerKey(per_key) => per_key.get(key).cloned().unwrap_or_default(),
        }
    }
}

fn token_list(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(s.split_whitespace().map(str::to_string).collect()),
        Value::Sequence(seq) => seq
            .iter()
            .map(|token| match token {
                Value::String(s) => Ok(s.clone()),
                _ => Err(anyhow!("modifier tokens must be strings")),
            })
            .collect(),
        _ => bail!("modifiers must be a string or a list of strings"),
    }
}

lazy_static! {
    static ref KEY_TAG: Regex = Regex::new(r"#.+$").expect("static regex");
}

/// A rule key naming one or more match targets:
/// `[~]target[+target...][#tag]`. The tag only disambiguates repeated keys;
/// the `~` prefix inverts the expected result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchKey {
    pub raw: String,
    pub inverted: bool,
    pub targets: Vec<MatchTarget>,
}

impl MatchKey {
    /// Strip the inversion prefix and tag suffix, leaving just the targets.
    pub fn trim(raw: &str) -> String {
        KEY_TAG
            .replace(raw.trim_start_matches('~'), "")
            .to_string()
    }

    /// `None` if `raw` doesn't name a (combination of) match target(s).
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = Self::trim(raw);
        let targets: Option<Vec<MatchTarget>> =
            trimmed.split('+').map(MatchTarget::parse).collect();
        let targets = targets?;
        if targets.is_empty() {
            return None;
        }
        Some(Self {
            raw: raw.to_string(),
            inverted: raw.starts_with('~'),
            targets,
        })
    }

    /// The single target this key names, if it isn't a `+` combination.
    fn single_target(&self) -> Option<MatchTarget> {
        match self.targets.as_slice() {
            [target] => Some(*target),
            _ => None,
        }
    }
}

/// Coerce a match key's YAML value to the list of strings it matches.
/// Scalars are accepted directly or inside a list; numbers and booleans are
/// stringified so numeric-looking values survive.
pub fn coerce_values(value: &Value) -> Result<Vec<String>> {
    fn scalar(value: &Value) -> Result<String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => bail!("match values must be strings, numbers, or booleans"),
        }
    }

    match value {
        Value::Sequence(seq) => seq.iter().map(scalar).collect(),
        _ => Ok(vec![scalar(value)?]),
    }
}

/// Lower one match key's values and modifier tokens to a regex source string.
pub fn build_pattern(key: &MatchKey, values: &[String], tokens: &[ModifierToken]) -> String {
    let escaped: Vec<String> = if tokens.contains(&ModifierToken::Regex) {
        values.to_vec()
    } else {
        values.iter().map(|value| regex::escape(value)).collect()
    };
    let mut group = format!("({values})", values = escaped.join("|"));

    let explicit = tokens.iter().find_map(|token| match token {
        ModifierToken::Match(match_type) => Some(*match_type),
        _ => None,
    });

    let match_type = match explicit {
        Some(match_type) => match_type,
        None => match key.single_target() {
            Some(target) => {
                if target == MatchTarget::Domain {
                    // a domain value should also match its subdomains
                    group = format!(r"(?:.*?\.)?{group}");
                }
                MatchType::default_for(target)
            }
            // combined keys anchor like free text
            None => MatchType::IncludesWord,
        },
    };

    match_type.apply(&group)
}

/// Compile a lowered pattern with the engine's standing flags: dot matches
/// newline, Unicode on, case-insensitive unless the rule says otherwise.
pub fn compile_pattern(source: &str, case_sensitive: bool) -> Result<Regex> {
    RegexBuilder::new(source)
        .case_insensitive(!case_sensitive)
        .dot_matches_new_line(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .map_err(|e| anyhow!("invalid pattern `{source}`: {e}"))
}
