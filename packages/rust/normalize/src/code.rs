//! Repository extracts: one record per function, method or class.

use serde_json::Value;

use skillsmith_shared::raw::{field, field_str, field_u32};
use skillsmith_shared::{Entry, Location, RawRecord, Signature, SourceKind};

use crate::signature::{clean_heading, param_from_value, parse_params};

pub(crate) fn normalize_record(record: &RawRecord) -> Option<Entry> {
    let identifier = qualified_name(record)?;

    let location = match field_str(record, &["file", "file_path", "path"]) {
        Some(path) => Location::File {
            path,
            line: field_u32(record, &["line", "line_number", "lineno"]),
        },
        None => Location::Unknown,
    };

    let mut entry = Entry::new(identifier, SourceKind::Code, location).with_description(
        field_str(record, &["docstring", "doc", "description"]).unwrap_or_default(),
    );
    if let Some(signature) = signature(record) {
        entry = entry.with_signature(signature);
    }
    Some(entry)
}

/// Fully qualified path, either given directly or composed from
/// module, class and name.
fn qualified_name(record: &RawRecord) -> Option<String> {
    if let Some(name) = field_str(record, &["qualified_name", "qualifiedName", "full_name"]) {
        return clean_heading(&name);
    }

    let name = field_str(record, &["name"])?;
    let parts: Vec<String> = [
        field_str(record, &["module", "namespace"]),
        field_str(record, &["class", "class_name", "parent"]),
        Some(name),
    ]
    .into_iter()
    .flatten()
    .collect();
    clean_heading(&parts.join("."))
}

/// A signature exists when the extractor reported a parameter list or a
/// return type, even an empty one. Classes and constants report neither.
fn signature(record: &RawRecord) -> Option<Signature> {
    let params = field(record, &["params", "parameters", "args"]);
    let returns = field_str(record, &["returns", "return_type", "return"]);
    if params.is_none() && returns.is_none() {
        return None;
    }

    let params = match params {
        Some(Value::Array(items)) => items.iter().filter_map(param_from_value).collect(),
        Some(Value::String(list)) => parse_params(list),
        _ => Vec::new(),
    };
    Some(Signature::new(params, returns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn structured_params_keep_defaults_as_optional() {
        let entry = normalize_record(&record(json!({
            "qualified_name": "rotate",
            "params": ["self", "angle: float", {"name": "snap", "type": "bool", "default": "false"}],
            "returns": "None",
            "docstring": "Rotate by angle.",
            "file": "node.py",
            "line": 42
        })))
        .expect("entry");
        let sig = entry.signature.expect("signature");
        assert_eq!(sig.to_string(), "(angle: float, snap: bool = false) -> None");
        assert!(sig.params[1].optional);
        assert_eq!(
            entry.location,
            Location::File {
                path: "node.py".into(),
                line: Some(42)
            }
        );
    }

    #[test]
    fn composes_name_from_module_and_class() {
        let entry = normalize_record(&record(json!({
            "module": "engine",
            "class": "Node2D",
            "name": "rotate",
            "parameters": "(self, angle)"
        })))
        .expect("entry");
        assert_eq!(entry.identifier, "engine.Node2D.rotate");
        assert_eq!(entry.signature.expect("signature").params.len(), 1);
    }

    #[test]
    fn class_without_params_has_no_signature() {
        let entry = normalize_record(&record(json!({"full_name": "pkg.Node"}))).expect("entry");
        assert!(entry.signature.is_none());
        assert_eq!(entry.location, Location::Unknown);
    }

    #[test]
    fn unusable_name_is_dropped() {
        assert!(normalize_record(&record(json!({"qualified_name": "not an identifier"}))).is_none());
        assert!(normalize_record(&record(json!({"docstring": "orphan"}))).is_none());
    }
}
