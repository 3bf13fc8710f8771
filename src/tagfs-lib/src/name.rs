use once_cell::sync::Lazy;
use regex::Regex;

use crate::{ItemType, TagFsError, TagFsResult};

/// ` |a, b|` suffix of a control-tree name, anchored at end of string.
static RELATED_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([^|]*) \|(.*)\|$").unwrap());
/// `|<id>|<rest>` disambiguation prefix used by files-directory listings.
static ID_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\|(\d+)\|(.*)$").unwrap());
/// `|<id>|<tag>|...|<name>` shape produced by the all-tags listing.
static TAGGED_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\|(\d+)(\||.*)\|([^|]+)$").unwrap());

/// Base filenames and tag names may not contain the vertical bar; the
/// engine reserves it for the disambiguation prefix.
pub fn is_valid_name(s: &str) -> bool {
    !s.contains('|')
}

/// A control-tree directory name decomposed into its parts: a leading `!`
/// selects the group-tag type, a trailing ` |csv|` lists related group-tags.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedName {
    pub name: String,
    pub item_type: ItemType,
    pub related: Vec<String>,
}

pub fn parse_control_name(input: &str) -> TagFsResult<ParsedName> {
    let (item_type, rest) = match input.strip_prefix('!') {
        Some(rest) => (ItemType::GroupTag, rest),
        None => (ItemType::Tag, input),
    };
    if let Some(caps) = RELATED_SUFFIX.captures(rest) {
        let related = caps[2]
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        return Ok(ParsedName {
            name: caps[1].to_string(),
            item_type,
            related,
        });
    }
    if !is_valid_name(rest) {
        return Err(TagFsError::InvalidParam(format!(
            "unmatched '|' in name {:?}",
            input
        )));
    }
    Ok(ParsedName {
        name: rest.to_string(),
        item_type,
        related: Vec::new(),
    })
}

/// Strips the display decorations from a control-tree name, yielding the
/// stored name and the type it implies.
pub fn base_name(input: &str) -> (String, ItemType) {
    let (item_type, rest) = match input.strip_prefix('!') {
        Some(rest) => (ItemType::GroupTag, rest),
        None => (ItemType::Tag, input),
    };
    match RELATED_SUFFIX.captures(rest) {
        Some(caps) => (caps[1].to_string(), item_type),
        None => (rest.to_string(), item_type),
    }
}

/// Splits a `|<id>|<rest>` disambiguation prefix off a files-directory name.
pub fn split_id_prefix(name: &str) -> Option<(i64, &str)> {
    let caps = ID_PREFIX.captures(name)?;
    let id: i64 = caps[1].parse().ok()?;
    Some((id, caps.get(2).map_or("", |m| m.as_str())))
}

fn clean_all_tags(name: &str, keep_id: bool) -> TagFsResult<String> {
    match TAGGED_NAME.captures(name) {
        Some(caps) => {
            let base = &caps[3];
            if !is_valid_name(base) {
                return Err(TagFsError::InvalidParam(format!("invalid name {:?}", name)));
            }
            if keep_id {
                Ok(format!("|{}|{}", &caps[1], base))
            } else {
                Ok(base.to_string())
            }
        }
        None => {
            if !is_valid_name(name) {
                return Err(TagFsError::InvalidParam(format!("invalid name {:?}", name)));
            }
            Ok(name.to_string())
        }
    }
}

fn clean_regular(name: &str) -> TagFsResult<String> {
    let rest = match split_id_prefix(name) {
        Some((_, rest)) => rest,
        None => name,
    };
    if !is_valid_name(rest) {
        return Err(TagFsError::InvalidParam(format!("invalid name {:?}", name)));
    }
    Ok(rest.to_string())
}

/// Normalizes a user-supplied files-directory name. Under the all-tags
/// variant the `|id|tags…|name` listing shape is accepted and reduced;
/// otherwise only a plain name or a `|id|name` disambiguation prefix is.
/// `keep_id` preserves the prefix for lookups that resolve by id.
pub fn clean_name(name: &str, all_tags: bool, keep_id: bool) -> TagFsResult<String> {
    if all_tags {
        return clean_all_tags(name, keep_id);
    }
    let clean = clean_regular(name)?;
    if keep_id {
        Ok(name.to_string())
    } else {
        Ok(clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_tag() {
        let parsed = parse_control_name("red").unwrap();
        assert_eq!(parsed.name, "red");
        assert_eq!(parsed.item_type, ItemType::Tag);
        assert!(parsed.related.is_empty());
    }

    #[test]
    fn test_parse_grouptag() {
        let parsed = parse_control_name("!colors").unwrap();
        assert_eq!(parsed.name, "colors");
        assert_eq!(parsed.item_type, ItemType::GroupTag);
    }

    #[test]
    fn test_parse_related_suffix() {
        let parsed = parse_control_name("red |colors, warm|").unwrap();
        assert_eq!(parsed.name, "red");
        assert_eq!(parsed.item_type, ItemType::Tag);
        assert_eq!(parsed.related, vec!["colors", "warm"]);
    }

    #[test]
    fn test_parse_grouptag_with_related() {
        let parsed = parse_control_name("!colors |red, blue|").unwrap();
        assert_eq!(parsed.name, "colors");
        assert_eq!(parsed.item_type, ItemType::GroupTag);
        assert_eq!(parsed.related, vec!["red", "blue"]);
    }

    #[test]
    fn test_parse_rejects_stray_bar() {
        assert!(parse_control_name("re|d").is_err());
        assert!(parse_control_name("red |colors").is_err());
    }

    #[test]
    fn test_parse_empty_related() {
        let parsed = parse_control_name("red ||").unwrap();
        assert_eq!(parsed.name, "red");
        assert!(parsed.related.is_empty());
    }

    #[test]
    fn test_base_name_strips_decorations() {
        assert_eq!(base_name("red |colors|"), ("red".to_string(), ItemType::Tag));
        assert_eq!(
            base_name("!colors |red, blue|"),
            ("colors".to_string(), ItemType::GroupTag)
        );
        assert_eq!(base_name("plain"), ("plain".to_string(), ItemType::Tag));
    }

    #[test]
    fn test_split_id_prefix() {
        assert_eq!(split_id_prefix("|42|doc"), Some((42, "doc")));
        assert_eq!(split_id_prefix("doc"), None);
        assert_eq!(split_id_prefix("|x|doc"), None);
    }

    #[test]
    fn test_clean_regular_names() {
        assert_eq!(clean_name("doc", false, false).unwrap(), "doc");
        assert_eq!(clean_name("|42|doc", false, false).unwrap(), "doc");
        assert_eq!(clean_name("|42|doc", false, true).unwrap(), "|42|doc");
        assert!(clean_name("do|c", false, false).is_err());
    }

    #[test]
    fn test_clean_all_tags_names() {
        assert_eq!(clean_name("|42|red|round|doc", true, false).unwrap(), "doc");
        assert_eq!(
            clean_name("|42|red|round|doc", true, true).unwrap(),
            "|42|doc"
        );
        assert_eq!(clean_name("|7||doc", true, false).unwrap(), "doc");
        assert_eq!(clean_name("doc", true, false).unwrap(), "doc");
        assert!(clean_name("do|c", true, false).is_err());
    }
}
