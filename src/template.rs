use crate::item::Item;
use lazy_static::lazy_static;
use regex::{Captures, Regex};

/// Subjects and report reasons are capped by the site.
pub const MAX_SUBJECT_LEN: usize = 100;
/// Comment and message bodies are capped by the site.
pub const MAX_BODY_LEN: usize = 10_000;

lazy_static! {
    static ref MATCH_GROUP: Regex = Regex::new(r"\{\{match-(\d+)\}\}").expect("static regex");
}

/// Expand `{{...}}` placeholders in a rule's template text against the item
/// that matched. `captures` holds the winning match's capture groups, full
/// match first; absent groups expand to empty.
pub fn expand(text: &str, item: &Item, captures: &[Option<String>]) -> String {
    let mut out = text.to_string();

    let kind = match item {
        Item::Submission(_) => "submission",
        Item::Comment(_) => "comment",
    };
    let link_id = match item {
        Item::Submission(s) => s.id.clone(),
        Item::Comment(c) => c
            .link_id
            .split('_')
            .nth(1)
            .unwrap_or_default()
            .to_string(),
    };
    let domain = match item {
        Item::Submission(s) => s.domain.clone(),
        Item::Comment(_) => String::new(),
    };
    let title = match item {
        Item::Submission(s) => s.title.clone(),
        Item::Comment(c) => c.link_title.clone(),
    };
    let url = match item {
        Item::Submission(s) => s.url.clone(),
        Item::Comment(_) => String::new(),
    };

    out = out.replace("{{body}}", item.raw_body());
    out = out.replace("{{kind}}", kind);
    out = out.replace("{{link_id}}", &link_id);
    out = out.replace("{{domain}}", &domain);
    out = out.replace("{{permalink}}", &item.permalink());
    out = out.replace("{{community}}", item.community());
    out = out.replace("{{title}}", &title);
    out = out.replace("{{url}}", &url);
    out = out.replace("{{user}}", item.author().unwrap_or("[deleted]"));

    let oembed_placeholders: [(&str, fn(&crate::item::Oembed) -> &Option<String>); 4] = [
        ("{{media_user}}", |o| &o.author_name),
        ("{{media_title}}", |o| &o.title),
        ("{{media_description}}", |o| &o.description),
        ("{{media_author_url}}", |o| &o.author_url),
    ];
    for (placeholder, pick) in oembed_placeholders {
        if !out.contains(placeholder) {
            continue;
        }
        let value = match item {
            Item::Submission(s) => s
                .media
                .as_ref()
                .and_then(|media| media.oembed.as_ref())
                .and_then(|oembed| pick(oembed).clone())
                .unwrap_or_default(),
            Item::Comment(_) => String::new(),
        };
        out = out.replace(placeholder, &value);
    }

    MATCH_GROUP
        .replace_all(&out, |groups: &Captures| {
            let index: usize = groups[1].parse().unwrap_or(usize::MAX);
            captures
                .get(index)
                .and_then(|group| group.clone())
                .unwrap_or_default()
        })
        .to_string()
}

/// Truncate on a character boundary.
pub fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::test_fixtures::{comment, submission};

    #[test]
    fn test_basic_placeholders() {
        let mut s = submission("abc");
        s.title = "Great deal".to_string();
        s.domain = "shop.example".to_string();
        s.author = Some("seller".to_string());
        let item = Item::Submission(s);

        let expanded = expand(
            "{{kind}} {{link_id}} by {{user}}: {{title}} ({{domain}})",
            &item,
            &[],
        );
        assert_eq!(expanded, "submission abc by seller: Great deal (shop.example)");
    }

    #[test]
    fn test_comment_placeholders_use_parent_link() {
        let mut c = comment("c9", "abc");
        c.link_title = "Original post".to_string();
        c.author = None;
        let item = Item::Comment(c);

        let expanded = expand("{{user}} on {{link_id}}: {{title}}", &item, &[]);
        assert_eq!(expanded, "[deleted] on abc: Original post");
    }

    #[test]
    fn test_match_groups() {
        let item = Item::Submission(submission("abc"));
        let captures = vec![
            Some("contains foo".to_string()),
            Some("foo".to_string()),
        ];
        assert_eq!(
            expand("flagged {{match-1}}", &item, &captures),
            "flagged foo"
        );
        // absent groups expand to empty, not an error
        assert_eq!(expand("[{{match-7}}]", &item, &captures), "[]");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 100), "short");
    }
}
