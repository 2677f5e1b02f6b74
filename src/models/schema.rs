//! Field-level validation for resource documents.
//!
//! Rules only constrain the fields they name; unknown keys pass through.

use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// String, `null` or empty.
    Text,
    /// Document id reference: UUID string, `null` or empty.
    Id,
    Bool,
    Number,
    List,
    Object,
    Email,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    /// Top-level key, or a dotted path into a nested object.
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub allowed: &'static [&'static str],
    /// Written on create when the field is absent.
    pub default: Option<&'static str>,
}

impl FieldRule {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            allowed: &[],
            default: None,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub const fn id(name: &'static str) -> Self {
        Self::new(name, FieldKind::Id)
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }

    pub const fn default_to(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        let ok = match (self.kind, value) {
            (FieldKind::Bool, Value::Bool(_)) => true,
            (FieldKind::Number, Value::Number(_)) => true,
            (FieldKind::List, Value::Array(_)) => true,
            (FieldKind::Object, Value::Object(_)) => true,
            (FieldKind::Text | FieldKind::Id | FieldKind::Email, Value::Null) => true,
            (FieldKind::Text, Value::String(_)) => true,
            (FieldKind::Id, Value::String(s)) => s.is_empty() || Uuid::parse_str(s).is_ok(),
            (FieldKind::Email, Value::String(s)) => s.is_empty() || looks_like_email(s),
            _ => false,
        };
        if !ok {
            return Err(match self.kind {
                FieldKind::Text => format!("\"{}\" must be a string", self.name),
                FieldKind::Id => format!("\"{}\" must be a valid id", self.name),
                FieldKind::Bool => format!("\"{}\" must be a boolean", self.name),
                FieldKind::Number => format!("\"{}\" must be a number", self.name),
                FieldKind::List => format!("\"{}\" must be an array", self.name),
                FieldKind::Object => format!("\"{}\" must be an object", self.name),
                FieldKind::Email => format!("\"{}\" must be a valid email", self.name),
            });
        }
        if !self.allowed.is_empty() {
            if let Value::String(s) = value {
                if !self.allowed.contains(&s.as_str()) {
                    return Err(format!(
                        "\"{}\" must be one of [{}]",
                        self.name,
                        self.allowed.join(", ")
                    ));
                }
            }
        }
        Ok(())
    }
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

/// Fields every resource accepts.
const COMMON: &[FieldRule] = &[
    FieldRule::new("isActive", FieldKind::Bool),
    FieldRule::new("isDeleted", FieldKind::Bool),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    Update,
}

fn lookup<'a>(body: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = body.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Validate `body` against `rules`, collecting every violation.
/// Required fields are only enforced on create.
pub fn validate(rules: &[FieldRule], body: &Map<String, Value>, mode: Mode) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    for rule in COMMON.iter().chain(rules) {
        match lookup(body, rule.name) {
            Some(value) => {
                if let Err(e) = rule.check(value) {
                    errors.push(e);
                }
            }
            None if rule.required && rule.default.is_none() && mode == Mode::Create => {
                errors.push(format!("\"{}\" is required", rule.name));
            }
            None => {}
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Fill top-level defaults for absent fields.
pub fn apply_defaults(rules: &[FieldRule], body: &mut Map<String, Value>) {
    for rule in rules {
        if let Some(default) = rule.default {
            if !rule.name.contains('.') && !body.contains_key(rule.name) {
                body.insert(rule.name.to_string(), Value::String(default.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RULES: &[FieldRule] = &[
        FieldRule::text("title"),
        FieldRule::id("eventId"),
        FieldRule::text("kind").one_of(&["A", "B"]).default_to("A"),
        FieldRule::text("event_type.type").one_of(&["Speaker"]).required(),
    ];

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn accepts_nulls_blanks_and_unknown_keys() {
        let b = body(json!({
            "title": null, "eventId": "", "extra": [1, 2],
            "event_type": {"type": "Speaker"}
        }));
        assert!(validate(RULES, &b, Mode::Create).is_ok());
    }

    #[test]
    fn collects_every_violation() {
        let b = body(json!({"title": 5, "eventId": "abc", "kind": "C", "isActive": "yes"}));
        let errs = validate(RULES, &b, Mode::Create).unwrap_err();
        assert_eq!(errs.len(), 5, "{errs:?}");
        assert!(errs.iter().any(|e| e.contains("event_type.type")));
    }

    #[test]
    fn required_only_on_create() {
        assert!(validate(RULES, &Map::new(), Mode::Update).is_ok());
        assert!(validate(RULES, &Map::new(), Mode::Create).is_err());
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let mut b = Map::new();
        apply_defaults(RULES, &mut b);
        assert_eq!(b.get("kind"), Some(&json!("A")));
    }
}
