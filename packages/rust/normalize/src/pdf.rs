//! PDF extracts: identifiers guessed from font runs, always low confidence.

use skillsmith_shared::raw::{field_str, field_u32};
use skillsmith_shared::{Entry, Location, RawRecord, Signature, SourceKind};

use crate::signature::{clean_heading, is_identifier, parse_declaration};

const MONO_HINTS: &[&str] = &["mono", "courier", "consol", "code"];
const BOLD_HINTS: &[&str] = &["bold", "heavy", "black", "semibold"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FontClass {
    Monospace,
    Bold,
    Body,
}

fn classify(font_hint: Option<&str>) -> FontClass {
    let Some(hint) = font_hint.map(str::to_ascii_lowercase) else {
        return FontClass::Body;
    };
    if MONO_HINTS.iter().any(|h| hint.contains(h)) {
        FontClass::Monospace
    } else if BOLD_HINTS.iter().any(|h| hint.contains(h)) {
        FontClass::Bold
    } else {
        FontClass::Body
    }
}

pub(crate) fn normalize_record(record: &RawRecord) -> Option<Entry> {
    let heading = field_str(record, &["heading_guess", "heading", "title"]);
    let body = field_str(record, &["body_text", "text", "body"]).unwrap_or_default();
    let font = field_str(record, &["font_hint", "font"]);

    let (identifier, signature, description) = match classify(font.as_deref()) {
        FontClass::Monospace => from_monospace(heading.as_deref(), &body)?,
        FontClass::Bold => (clean_heading(heading.as_deref()?)?, None, body),
        FontClass::Body => return None,
    };

    let location = match field_u32(record, &["page_number", "page"]) {
        Some(page) => Location::PdfPage { page },
        None => Location::Unknown,
    };

    let mut entry = Entry::new(identifier, SourceKind::Pdf, location).with_description(description);
    if let Some(signature) = signature {
        entry = entry.with_signature(signature);
    }
    Some(entry)
}

/// A monospace run is either a declaration or a bare token. When the run
/// came from the body, the remaining lines are the description.
fn from_monospace(
    heading: Option<&str>,
    body: &str,
) -> Option<(String, Option<Signature>, String)> {
    if let Some(heading) = heading {
        let (id, sig) = guess(heading)?;
        return Some((id, sig, body.to_string()));
    }

    let mut lines = body.lines();
    let first = lines.next()?;
    let (id, sig) = guess(first)?;
    let rest = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    Some((id, sig, rest))
}

fn guess(text: &str) -> Option<(String, Option<Signature>)> {
    if let Some((id, sig)) = parse_declaration(text) {
        return Some((id, Some(sig)));
    }
    text.split_whitespace()
        .map(|token| token.trim_matches(|c: char| matches!(c, ',' | ';' | '`' | '"')))
        .find(|token| is_identifier(token))
        .map(|token| (token.to_string(), None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> RawRecord {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn monospace_declaration() {
        let entry = normalize_record(&record(json!({
            "page_number": 12,
            "heading_guess": "rotate(angle: float)",
            "body_text": "Rotates the node.",
            "font_hint": "CourierNew"
        })))
        .expect("entry");
        assert_eq!(entry.identifier, "rotate");
        assert!(entry.low_confidence);
        assert_eq!(entry.location, Location::PdfPage { page: 12 });
        assert_eq!(entry.signature.expect("signature").params.len(), 1);
    }

    #[test]
    fn monospace_body_run_splits_description() {
        let entry = normalize_record(&record(json!({
            "page": "3",
            "body_text": "flush_cache\nEmpties every cache level.",
            "font": "DejaVu Sans Mono"
        })))
        .expect("entry");
        assert_eq!(entry.identifier, "flush_cache");
        assert!(entry.signature.is_none());
        assert_eq!(entry.description, "Empties every cache level.");
    }

    #[test]
    fn bold_heading() {
        let entry = normalize_record(&record(json!({
            "heading_guess": "Node2D.rotate",
            "font_hint": "Helvetica-Bold"
        })))
        .expect("entry");
        assert_eq!(entry.identifier, "Node2D.rotate");
    }

    #[test]
    fn body_font_and_narrative_are_dropped() {
        assert!(normalize_record(&record(json!({"heading_guess": "rotate", "font_hint": "Times"}))).is_none());
        assert!(
            normalize_record(&record(json!({"heading_guess": "Chapter one", "font_hint": "Arial Bold"})))
                .is_none()
        );
    }
}
