//! Documentation extracts: one record per rendered section.

use url::Url;

use skillsmith_shared::raw::field_str;
use skillsmith_shared::{Entry, Location, RawRecord, SourceKind};

use crate::signature::{clean_heading, parse_declaration};

/// One-word section titles that are prose, not API names.
const SECTION_TITLES: &[&str] = &[
    "overview",
    "introduction",
    "installation",
    "install",
    "setup",
    "usage",
    "examples",
    "example",
    "tutorial",
    "quickstart",
    "summary",
    "description",
    "notes",
    "requirements",
    "troubleshooting",
    "faq",
    "changelog",
    "contents",
    "glossary",
    "license",
    "reference",
    "index",
];

/// Turn one documentation record into an entry, or `None` when it carries
/// no usable identifier.
pub(crate) fn normalize_record(record: &RawRecord) -> Option<Entry> {
    let heading = field_str(record, &["heading", "title", "anchor_text"]);
    let fence = field_str(record, &["code_fence", "code", "code_block", "signature"]);
    let url = field_str(record, &["url", "page_url", "source_url"]);
    let body = field_str(record, &["body_text", "body", "text", "content"]).unwrap_or_default();

    let declared = fence.as_deref().and_then(parse_declaration);

    let identifier = match heading.as_deref() {
        // Narrative headings ("Getting started") fall back to the fence.
        Some(h) => heading_identifier(h).or_else(|| declared.as_ref().map(|(name, _)| name.clone())),
        None => declared
            .as_ref()
            .map(|(name, _)| name.clone())
            .or_else(|| url.as_deref().and_then(anchor).and_then(|a| heading_identifier(&a))),
    }?;

    let location = match url {
        Some(url) => Location::Page { url },
        None => Location::Unknown,
    };

    let mut entry = Entry::new(identifier, SourceKind::Documentation, location).with_description(body);
    if let Some((_, signature)) = declared {
        entry = entry.with_signature(signature);
    }
    Some(entry)
}

/// The heading as an identifier, unless it is narrative. A known section
/// title only counts when the heading marks it as code.
fn heading_identifier(heading: &str) -> Option<String> {
    let cleaned = clean_heading(heading)?;
    let marked_as_code = heading.contains('`') || heading.contains('(');
    let is_title = SECTION_TITLES.contains(&cleaned.to_ascii_lowercase().as_str());
    (marked_as_code || !is_title).then_some(cleaned)
}

/// The `#fragment` of a page URL. Relative URLs are common in extracts, so
/// fall back to a plain split when the URL does not parse.
fn anchor(url: &str) -> Option<String> {
    let fragment = match Url::parse(url) {
        Ok(parsed) => parsed.fragment().map(str::to_string),
        Err(_) => url.split_once('#').map(|(_, f)| f.to_string()),
    }?;
    (!fragment.is_empty()).then_some(fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> RawRecord {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn heading_and_fence() {
        let entry = normalize_record(&record(json!({
            "heading": "## `rotate()`",
            "body_text": "Rotates the node.",
            "code_fence": "```python\ndef rotate(angle: float)\n```",
            "url": "https://docs.example.com/node#rotate"
        })))
        .expect("entry");
        assert_eq!(entry.identifier, "rotate");
        assert_eq!(entry.description, "Rotates the node.");
        assert_eq!(entry.signature.expect("signature").params[0].name, "angle");
        assert_eq!(
            entry.location,
            Location::Page {
                url: "https://docs.example.com/node#rotate".into()
            }
        );
    }

    #[test]
    fn heading_without_fence_has_no_signature() {
        let entry = normalize_record(&record(json!({"title": "flush", "body": "Flushes."})))
            .expect("entry");
        assert!(entry.signature.is_none());
        assert_eq!(entry.location, Location::Unknown);
    }

    #[test]
    fn narrative_heading_uses_fence_or_drops() {
        let from_fence = normalize_record(&record(json!({
            "heading": "Rotating things",
            "code_fence": "def rotate(angle)"
        })))
        .expect("entry");
        assert_eq!(from_fence.identifier, "rotate");

        assert!(normalize_record(&record(json!({"heading": "Getting started"}))).is_none());
    }

    #[test]
    fn anchor_only_when_heading_absent() {
        let from_anchor =
            normalize_record(&record(json!({"url": "/api/node.html#move-local-x", "body": "Moves."})))
                .expect("entry");
        assert_eq!(from_anchor.identifier, "move-local-x");

        assert!(
            normalize_record(&record(json!({"heading": "An overview", "url": "/api#rotate"})))
                .is_none()
        );
    }

    #[test]
    fn section_titles_are_not_identifiers() {
        assert!(normalize_record(&record(json!({"heading": "Overview", "body": "About."}))).is_none());
        assert!(
            normalize_record(&record(json!({"url": "https://docs.example.com/guide#installation"})))
                .is_none()
        );
        // Written as code, it is an API name after all.
        let entry = normalize_record(&record(json!({"heading": "`usage()`"}))).expect("entry");
        assert_eq!(entry.identifier, "usage");
        // Other single words stay identifiers.
        let entry = normalize_record(&record(json!({"heading": "Vector2"}))).expect("entry");
        assert_eq!(entry.identifier, "Vector2");
    }
}
