use crate::pattern::compiler::{MatchKey, MatchType, ModifierToken};
use lazy_static::lazy_static;
use regex::Regex;
use serde_yaml::{Mapping, Value};

/// A structural problem in one section of a rule document. Routed back to
/// whoever submitted the document; never fatal to the engine.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid condition in section #{section}: {message}")]
pub struct ValidationError {
    pub section: usize,
    pub message: String,
}

impl ValidationError {
    pub fn new(section: usize, message: impl Into<String>) -> Self {
        Self {
            section,
            message: message.into(),
        }
    }
}

/// Known configuration keys, as opposed to match keys.
const CONFIG_KEYS: &[&str] = &[
    "action",
    "author_is_submitter",
    "body_max_length",
    "body_min_length",
    "comment",
    "ignore_blockquotes",
    "is_reply",
    "link_flair_class",
    "link_flair_text",
    "message",
    "message_subject",
    "moderators_exempt",
    "modifiers",
    "modmail",
    "modmail_subject",
    "overwrite_user_flair",
    "priority",
    "report",
    "report_reason",
    "reports",
    "set_options",
    "standard",
    "type",
    "user_conditions",
    "user_flair_class",
    "user_flair_text",
];

const USER_CONDITION_KEYS: &[&str] = &[
    "account_age",
    "combined_karma",
    "comment_karma",
    "is_gold",
    "link_karma",
    "must_satisfy",
    "rank",
];

lazy_static! {
    static ref OPER_INT: Regex = Regex::new(r"^((==?|<|>) )?-?\d+$").expect("static regex");
    static ref OPER_RANK: Regex =
        Regex::new(r"^((==?|<|>) )?(user|contributor|moderator)$").expect("static regex");
}

/// Validate one lowercased rule mapping before compilation. The `standard`
/// key, if any, has already been resolved and overlaid by the loader.
pub fn check_condition(values: &Mapping) -> Result<(), String> {
    check_values_not_empty(values)?;
    check_keys(values)?;

    check_bool(values, "author_is_submitter")?;
    check_bool(values, "is_reply")?;
    check_bool(values, "ignore_blockquotes")?;
    check_bool(values, "moderators_exempt")?;
    check_bool(values, "overwrite_user_flair")?;

    check_int(values, "reports")?;
    check_int(values, "priority")?;
    check_int(values, "body_min_length")?;
    check_int(values, "body_max_length")?;

    check_string(values, "standard")?;
    check_string(values, "comment")?;
    check_string(values, "modmail")?;
    check_string(values, "modmail_subject")?;
    check_string(values, "message")?;
    check_string(values, "message_subject")?;
    check_string(values, "report_reason")?;
    check_string(values, "report")?;
    check_string(values, "link_flair_text")?;
    check_string(values, "link_flair_class")?;
    check_string(values, "user_flair_text")?;
    check_string(values, "user_flair_class")?;

    check_value_in(values, "action", &["approve", "remove", "spam", "report"])?;
    check_value_in(values, "type", &["submission", "comment", "both"])?;

    check_set_options(values)?;
    check_modifiers(values)?;
    check_user_conditions(values)?;

    Ok(())
}

/// No value anywhere in the mapping may be empty.
fn check_values_not_empty(values: &Mapping) -> Result<(), String> {
    for (key, value) in values {
        let key = key.as_str().unwrap_or_default();
        match value {
            Value::Mapping(mapping) => check_values_not_empty(mapping)?,
            Value::Null => return Err(format!("`{key}` set to an empty value")),
            Value::String(s) if s.is_empty() => {
                return Err(format!("`{key}` set to an empty value"))
            }
            Value::Sequence(seq) if seq.is_empty() => {
                return Err(format!("`{key}` set to an empty value"))
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_keys(values: &Mapping) -> Result<(), String> {
    for (key, _) in values {
        let Some(key) = key.as_str() else {
            return Err("rule keys must be strings".to_string());
        };
        if CONFIG_KEYS.contains(&key) {
            continue;
        }
        if MatchKey::parse(key).is_some() {
            continue;
        }
        return Err(format!("invalid variable: `{key}`"));
    }
    Ok(())
}

fn check_bool(values: &Mapping, key: &str) -> Result<(), String> {
    match values.get(key) {
        None | Some(Value::Bool(_)) => Ok(()),
        Some(_) => Err(format!("{key} must be true or false")),
    }
}

fn check_int(values: &Mapping, key: &str) -> Result<(), String> {
    match values.get(key) {
        None => Ok(()),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
        Some(Value::String(s)) if s.trim().parse::<i64>().is_ok() => Ok(()),
        Some(_) => Err(format!("{key} must be an integer")),
    }
}

fn check_string(values: &Mapping, key: &str) -> Result<(), String> {
    match values.get(key) {
        None | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(format!("{key} must be a string")),
    }
}

fn check_value_in(values: &Mapping, key: &str, valid: &[&str]) -> Result<(), String> {
    match values.get(key) {
        None => Ok(()),
        Some(Value::String(s)) if valid.contains(&s.as_str()) => Ok(()),
        Some(value) => Err(format!(
            "invalid {key}: {value}",
            value = serde_yaml::to_string(value).unwrap_or_default().trim()
        )),
    }
}

fn check_set_options(values: &Mapping) -> Result<(), String> {
    let Some(value) = values.get("set_options") else {
        return Ok(());
    };
    let options: Vec<String> = match value {
        Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
        Value::Sequence(seq) => seq
            .iter()
            .map(|option| {
                option
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| "set_options entries must be strings".to_string())
            })
            .collect::<Result<_, _>>()?,
        _ => return Err("set_options must be a string or list".to_string()),
    };
    for option in options {
        if !matches!(option.as_str(), "nsfw" | "contest" | "sticky") {
            return Err(format!("invalid set_options value: `{option}`"));
        }
    }
    Ok(())
}

fn modifier_token_list(value: &Value) -> Result<Vec<String>, String> {
    match value {
        Value::String(s) => Ok(s.split_whitespace().map(str::to_string).collect()),
        Value::Sequence(seq) => seq
            .iter()
            .map(|token| {
                token
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| "modifier tokens must be strings".to_string())
            })
            .collect(),
        _ => Err("modifiers must be a string or a list of strings".to_string()),
    }
}

fn check_modifiers(values: &Mapping) -> Result<(), String> {
    let Some(modifiers) = values.get("modifiers") else {
        return Ok(());
    };

    let token_lists: Vec<Vec<String>> = match modifiers {
        Value::Mapping(mapping) => {
            for (key, _) in mapping {
                let key_matches_subject = key
                    .as_str()
                    .map(|key| values.contains_key(key))
                    .unwrap_or(false);
                if !key_matches_subject {
                    return Err(format!(
                        "invalid modifiers variable: `{key}` - check for typos and \
                         ensure all modifiers correspond to a defined match subject",
                        key = key.as_str().unwrap_or_default()
                    ));
                }
            }
            mapping
                .iter()
                .map(|(_, tokens)| modifier_token_list(tokens))
                .collect::<Result<_, _>>()?
        }
        _ => vec![modifier_token_list(modifiers)?],
    };

    for tokens in token_lists {
        let mut match_types = 0;
        for token in &tokens {
            match ModifierToken::parse(token) {
                None => return Err(format!("invalid modifier: `{token}`")),
                Some(ModifierToken::Match(_)) => match_types += 1,
                Some(_) => {}
            }
        }
        if match_types > 1 {
            let names: Vec<&str> = MatchType::ALL.iter().map(MatchType::as_str).collect();
            return Err(format!(
                "more than one match type modifier (`{names}`) specified",
                names = names.join(", ")
            ));
        }
    }
    Ok(())
}

fn check_user_conditions(values: &Mapping) -> Result<(), String> {
    let Some(user_conditions) = values.get("user_conditions") else {
        return Ok(());
    };
    let Value::Mapping(user_conditions) = user_conditions else {
        return Err("user_conditions must be a mapping".to_string());
    };

    for (key, value) in user_conditions {
        let Some(key) = key.as_str() else {
            return Err("user_conditions keys must be strings".to_string());
        };
        if !USER_CONDITION_KEYS.contains(&key) {
            return Err(format!("invalid user_conditions variable: `{key}`"));
        }
        match key {
            "is_gold" => {
                if !matches!(value, Value::Bool(_)) {
                    return Err("is_gold must be true or false".to_string());
                }
            }
            "must_satisfy" => {
                if !matches!(value.as_str(), Some("any") | Some("all")) {
                    return Err(format!(
                        "invalid must_satisfy: {value}",
                        value = serde_yaml::to_string(value).unwrap_or_default().trim()
                    ));
                }
            }
            "rank" => check_operator_value(key, value, &OPER_RANK, false)?,
            _ => check_operator_value(key, value, &OPER_INT, true)?,
        }
    }
    Ok(())
}

fn check_operator_value(
    key: &str,
    value: &Value,
    pattern: &Regex,
    allow_bare_int: bool,
) -> Result<(), String> {
    match value {
        Value::Number(n) if allow_bare_int && n.is_i64() => Ok(()),
        Value::String(s) if pattern.is_match(s) => Ok(()),
        _ => Err(format!(
            "invalid {key}: {value}",
            value = serde_yaml::to_string(value).unwrap_or_default().trim()
        )),
    }
}
