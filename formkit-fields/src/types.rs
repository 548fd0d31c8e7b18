//! Core metadata types: entities, entries, and field domains.
//!
//! An entity is a named, ordered set of entries. Each entry is a field (a
//! scalar leaf with a shared [`Domain`]), a nested object, or a nested list.
//! Object and list entries reference other entities by name and are resolved
//! through the [`EntityRegistry`](crate::EntityRegistry).

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use formkit_common::Translate;

use crate::error::{FieldsError, Result};

/// Type marker for a field entry. Drives default parsing of user input.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    #[default]
    Text,
    Number,
    Boolean,
    Date,
    Json,
}

/// A declarative validator, loadable from YAML.
///
/// `message` overrides the default translation key for the failure message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Rule {
    MinLength {
        min: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    MaxLength {
        max: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Pattern {
        regex: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Min {
        min: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Max {
        max: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    OneOf {
        values: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Email {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

impl Rule {
    /// Kebab-case rule name, used for validator names and default message keys.
    pub fn name(&self) -> &'static str {
        match self {
            Rule::MinLength { .. } => "min-length",
            Rule::MaxLength { .. } => "max-length",
            Rule::Pattern { .. } => "pattern",
            Rule::Min { .. } => "min",
            Rule::Max { .. } => "max",
            Rule::OneOf { .. } => "one-of",
            Rule::Email { .. } => "email",
        }
    }

    fn message_key(&self) -> String {
        let custom = match self {
            Rule::MinLength { message, .. }
            | Rule::MaxLength { message, .. }
            | Rule::Pattern { message, .. }
            | Rule::Min { message, .. }
            | Rule::Max { message, .. }
            | Rule::OneOf { message, .. }
            | Rule::Email { message } => message.clone(),
        };
        custom.unwrap_or_else(|| format!("validation.{}", self.name()))
    }

    fn compile(self) -> Result<CompiledRule> {
        let regex = match &self {
            Rule::Pattern { regex, .. } => Some(regex.as_str()),
            Rule::Email { .. } => Some(EMAIL_PATTERN),
            _ => None,
        }
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| FieldsError::InvalidRule {
                rule: self.name().to_string(),
                message: e.to_string(),
            })
        })
        .transpose()?;
        Ok(CompiledRule { rule: self, regex })
    }
}

struct CompiledRule {
    rule: Rule,
    regex: Option<Regex>,
}

impl CompiledRule {
    fn check(&self, value: &Value, translator: &dyn Translate) -> Option<String> {
        let key = self.rule.message_key();
        match &self.rule {
            Rule::MinLength { min, .. } => (length(value)? < *min)
                .then(|| translator.translate(&key, &[("min", &min.to_string())])),
            Rule::MaxLength { max, .. } => (length(value)? > *max)
                .then(|| translator.translate(&key, &[("max", &max.to_string())])),
            Rule::Min { min, .. } => (number(value)? < *min)
                .then(|| translator.translate(&key, &[("min", &min.to_string())])),
            Rule::Max { max, .. } => (number(value)? > *max)
                .then(|| translator.translate(&key, &[("max", &max.to_string())])),
            Rule::OneOf { values, .. } => {
                (!values.contains(value)).then(|| translator.translate(&key, &[]))
            }
            Rule::Pattern { .. } | Rule::Email { .. } => {
                let text = plain_text(value);
                let regex = self.regex.as_ref()?;
                (!regex.is_match(&text)).then(|| translator.translate(&key, &[]))
            }
        }
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Render a value as plain text: strings unquoted, null as empty.
pub(crate) fn plain_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

enum Check {
    Rule(CompiledRule),
    Custom(Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>),
}

/// A named predicate returning an error message on failure.
///
/// Rule validators translate their message through the engine's translator;
/// custom validators return final text.
#[derive(Clone)]
pub struct Validator {
    name: String,
    check: Arc<Check>,
}

impl Validator {
    /// Wrap a closure as a validator.
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&Value) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(Check::Custom(Arc::new(f))),
        }
    }

    /// Compile a declarative rule. Fails on an invalid pattern.
    pub fn from_rule(rule: Rule) -> Result<Self> {
        Ok(Self {
            name: rule.name().to_string(),
            check: Arc::new(Check::Rule(rule.compile()?)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the predicate against a defined value.
    pub fn check(&self, value: &Value, translator: &dyn Translate) -> Option<String> {
        match self.check.as_ref() {
            Check::Rule(rule) => rule.check(value, translator),
            Check::Custom(f) => f(value),
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Validator").field(&self.name).finish()
    }
}

type TextFormatter = Arc<dyn Fn(&Value) -> String + Send + Sync>;
type Unformatter = Arc<dyn Fn(&str) -> Value + Send + Sync>;

/// Per-field formatting and validation configuration.
///
/// Always held behind `Arc` so every node instantiated for a field shares it.
#[derive(Clone)]
pub struct Domain {
    name: String,
    required: bool,
    validators: Vec<Validator>,
    display_formatter: Option<TextFormatter>,
    input_formatter: Option<TextFormatter>,
    unformatter: Option<Unformatter>,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            validators: Vec::new(),
            display_formatter: None,
            input_formatter: None,
            unformatter: None,
        }
    }

    /// Mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Append a validator. Validators run in the order they are added.
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Append compiled declarative rules.
    pub fn rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Result<Self> {
        for rule in rules {
            self.validators.push(Validator::from_rule(rule)?);
        }
        Ok(self)
    }

    pub fn display_formatter(mut self, f: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
        self.display_formatter = Some(Arc::new(f));
        self
    }

    pub fn input_formatter(mut self, f: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
        self.input_formatter = Some(Arc::new(f));
        self
    }

    pub fn unformatter(mut self, f: impl Fn(&str) -> Value + Send + Sync + 'static) -> Self {
        self.unformatter = Some(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Text shown in read-only (consulting) mode.
    pub fn format_display(&self, value: &Value) -> String {
        match &self.display_formatter {
            Some(f) => f(value),
            None => plain_text(value),
        }
    }

    /// Text placed in an input control while editing.
    pub fn format_input(&self, value: &Value) -> String {
        match &self.input_formatter {
            Some(f) => f(value),
            None => plain_text(value),
        }
    }

    fn unformat(&self, text: &str) -> Option<Value> {
        self.unformatter.as_ref().map(|f| f(text))
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("validators", &self.validators)
            .finish_non_exhaustive()
    }
}

/// A scalar leaf entry.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub translation_key: String,
    pub field_type: FieldType,
    pub domain: Arc<Domain>,
}

impl FieldDef {
    /// Parse text typed by a user into a value.
    ///
    /// Uses the domain's unformatter when set; otherwise parses according to
    /// the field type. Empty input becomes `Null`, unparseable input stays text
    /// so validation can report it.
    pub fn unformat(&self, text: &str) -> Value {
        if let Some(value) = self.domain.unformat(text) {
            return value;
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        match self.field_type {
            FieldType::Text | FieldType::Date => Value::String(text.to_string()),
            FieldType::Number => serde_json::from_str::<serde_json::Number>(trimmed)
                .map(Value::Number)
                .unwrap_or_else(|_| Value::String(text.to_string())),
            FieldType::Boolean => match trimmed {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(text.to_string()),
            },
            FieldType::Json => {
                serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(text.to_string()))
            }
        }
    }
}

/// One entry of an entity: a field, a nested object, or a nested list.
#[derive(Debug, Clone)]
pub enum EntryDef {
    Field(FieldDef),
    Object { entity: String },
    List { entity: String },
}

impl EntryDef {
    pub fn as_field(&self) -> Option<&FieldDef> {
        match self {
            EntryDef::Field(field) => Some(field),
            _ => None,
        }
    }

    /// Name of the referenced entity for object and list entries.
    pub fn target(&self) -> Option<&str> {
        match self {
            EntryDef::Field(_) => None,
            EntryDef::Object { entity } | EntryDef::List { entity } => Some(entity),
        }
    }

    /// `"field"`, `"object"` or `"list"`.
    pub fn kind(&self) -> &'static str {
        match self {
            EntryDef::Field(_) => "field",
            EntryDef::Object { .. } => "object",
            EntryDef::List { .. } => "list",
        }
    }
}

/// Immutable description of an entity's entries, in declaration order.
#[derive(Debug, Clone)]
pub struct EntityDef {
    name: String,
    identity: Option<String>,
    entries: IndexMap<String, EntryDef>,
}

impl EntityDef {
    pub fn builder(name: impl Into<String>) -> EntityDefBuilder {
        EntityDefBuilder {
            name: name.into(),
            identity: None,
            entries: IndexMap::new(),
            duplicate: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field used to match list elements across reloads, if declared.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn entry(&self, name: &str) -> Option<&EntryDef> {
        self.entries.get(name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.entries.get(name).and_then(EntryDef::as_field)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &EntryDef)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for [`EntityDef`]. Errors are reported by [`build`](Self::build).
pub struct EntityDefBuilder {
    name: String,
    identity: Option<String>,
    entries: IndexMap<String, EntryDef>,
    duplicate: Option<String>,
}

impl EntityDefBuilder {
    /// Add a field with the given domain; the translation key is `<entity>.<field>`.
    pub fn field(self, name: impl Into<String>, field_type: FieldType, domain: Arc<Domain>) -> Self {
        let name = name.into();
        let translation_key = format!("{}.{}", self.name, name);
        self.field_def(FieldDef {
            name,
            translation_key,
            field_type,
            domain,
        })
    }

    /// Add a plain optional text field with its own empty domain.
    pub fn text(self, name: impl Into<String>) -> Self {
        let name = name.into();
        let domain = Arc::new(Domain::new(format!("{}.{}", self.name, name)));
        self.field(name, FieldType::Text, domain)
    }

    pub fn field_def(mut self, def: FieldDef) -> Self {
        let name = def.name.clone();
        self.insert(name, EntryDef::Field(def));
        self
    }

    pub fn object(mut self, name: impl Into<String>, entity: impl Into<String>) -> Self {
        self.insert(name.into(), EntryDef::Object { entity: entity.into() });
        self
    }

    pub fn list(mut self, name: impl Into<String>, entity: impl Into<String>) -> Self {
        self.insert(name.into(), EntryDef::List { entity: entity.into() });
        self
    }

    /// Declare the identity field used for list reconciliation.
    pub fn identity(mut self, name: impl Into<String>) -> Self {
        self.identity = Some(name.into());
        self
    }

    fn insert(&mut self, name: String, entry: EntryDef) {
        if self.entries.contains_key(&name) {
            self.duplicate.get_or_insert(name);
        } else {
            self.entries.insert(name, entry);
        }
    }

    pub fn build(self) -> Result<EntityDef> {
        if let Some(name) = self.duplicate {
            return Err(FieldsError::DuplicateEntry {
                entity: self.name,
                name,
            });
        }
        if let Some(identity) = &self.identity {
            if !matches!(self.entries.get(identity), Some(EntryDef::Field(_))) {
                return Err(FieldsError::InvalidIdentity {
                    entity: self.name,
                    name: identity.clone(),
                });
            }
        }
        Ok(EntityDef {
            name: self.name,
            identity: self.identity,
            entries: self.entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formkit_common::KeyTranslator;
    use serde_json::json;

    #[test]
    fn rule_yaml_round_trip() {
        let rule = Rule::MinLength {
            min: 2,
            message: Some("name.too-short".into()),
        };
        let yaml = serde_yaml_ng::to_string(&rule).unwrap();
        assert!(yaml.contains("kind: min-length"));
        let parsed: Rule = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(rule, parsed);
    }

    #[test]
    fn min_length_uses_custom_message_key() {
        let v = Validator::from_rule(Rule::MinLength {
            min: 2,
            message: Some("too short".into()),
        })
        .unwrap();
        assert_eq!(v.check(&json!("A"), &KeyTranslator), Some("too short".into()));
        assert_eq!(v.check(&json!("Ann"), &KeyTranslator), None);
    }

    #[test]
    fn numeric_rules_accept_numeric_strings() {
        let v = Validator::from_rule(Rule::Max {
            max: 10.0,
            message: None,
        })
        .unwrap();
        assert_eq!(v.check(&json!("11"), &KeyTranslator), Some("validation.max".into()));
        assert_eq!(v.check(&json!(3), &KeyTranslator), None);
    }

    #[test]
    fn email_rule() {
        let v = Validator::from_rule(Rule::Email { message: None }).unwrap();
        assert!(v.check(&json!("ann@example.com"), &KeyTranslator).is_none());
        assert_eq!(v.check(&json!("ann"), &KeyTranslator), Some("validation.email".into()));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = Validator::from_rule(Rule::Pattern {
            regex: "(".into(),
            message: None,
        })
        .unwrap_err();
        assert!(matches!(err, FieldsError::InvalidRule { .. }));
    }

    #[test]
    fn duplicate_entries_fail_build() {
        let err = EntityDef::builder("person")
            .text("name")
            .list("name", "phone")
            .build()
            .unwrap_err();
        assert!(matches!(err, FieldsError::DuplicateEntry { name, .. } if name == "name"));
    }

    #[test]
    fn identity_must_be_a_field() {
        let err = EntityDef::builder("person")
            .object("address", "address")
            .identity("address")
            .build()
            .unwrap_err();
        assert!(matches!(err, FieldsError::InvalidIdentity { .. }));
    }

    #[test]
    fn entries_keep_declaration_order() {
        let entity = EntityDef::builder("person")
            .text("name")
            .object("address", "address")
            .list("phones", "phone")
            .build()
            .unwrap();
        let names: Vec<_> = entity.entries().map(|(name, _)| name).collect();
        assert_eq!(names, ["name", "address", "phones"]);
        assert_eq!(entity.field("name").unwrap().translation_key, "person.name");
        assert_eq!(entity.entry("phones").unwrap().kind(), "list");
    }

    #[test]
    fn unformat_by_field_type() {
        let domain = Arc::new(Domain::new("age"));
        let age = FieldDef {
            name: "age".into(),
            translation_key: "person.age".into(),
            field_type: FieldType::Number,
            domain,
        };
        assert_eq!(age.unformat("42"), json!(42));
        assert_eq!(age.unformat(" "), Value::Null);
        assert_eq!(age.unformat("abc"), json!("abc"));
    }

    #[test]
    fn domain_formatters_override_defaults() {
        let domain = Domain::new("price")
            .display_formatter(|v| format!("{} EUR", plain_text(v)))
            .unformatter(|s| json!(s.trim_end_matches(" EUR")));
        assert_eq!(domain.format_display(&json!(5)), "5 EUR");
        assert_eq!(domain.format_input(&json!(5)), "5");
        assert_eq!(domain.unformat("5 EUR"), Some(json!("5")));
    }
}
