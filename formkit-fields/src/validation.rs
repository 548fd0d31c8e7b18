//! Field-level validation.
//!
//! The engine is stateless apart from its translator: the same field and value
//! always produce the same result.

use std::sync::Arc;

use serde_json::Value;

use formkit_common::{KeyTranslator, Translate};

use crate::types::FieldDef;

/// Message key used when a required field is empty.
pub const REQUIRED_KEY: &str = "validation.required";

/// True for undefined, `null`, `""` and `[]`.
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// Runs field domains against values.
#[derive(Clone)]
pub struct ValidationEngine {
    translator: Arc<dyn Translate>,
}

impl ValidationEngine {
    pub fn new(translator: Arc<dyn Translate>) -> Self {
        Self { translator }
    }

    pub fn translator(&self) -> &dyn Translate {
        self.translator.as_ref()
    }

    /// Validate one field value.
    ///
    /// Empty values fail only the required check and skip the validators.
    /// Otherwise validators run in declared order and the first message wins.
    pub fn validate_field(&self, field: &FieldDef, value: Option<&Value>) -> Option<String> {
        if is_empty_value(value) {
            if !field.domain.is_required() {
                return None;
            }
            let label = self.translator.translate(&field.translation_key, &[]);
            return Some(self.translator.translate(REQUIRED_KEY, &[("field", &label)]));
        }
        let value = value?;
        field
            .domain
            .validators()
            .iter()
            .find_map(|validator| validator.check(value, self.translator.as_ref()))
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new(Arc::new(KeyTranslator))
    }
}

impl std::fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Domain, FieldType, Rule, Validator};
    use formkit_common::CatalogTranslator;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn field(domain: Domain) -> FieldDef {
        FieldDef {
            name: "name".into(),
            translation_key: "person.name".into(),
            field_type: FieldType::Text,
            domain: Arc::new(domain),
        }
    }

    #[test]
    fn optional_empty_field_is_valid() {
        let engine = ValidationEngine::default();
        let f = field(Domain::new("name").rules([Rule::Email { message: None }]).unwrap());
        assert_eq!(engine.validate_field(&f, None), None);
        assert_eq!(engine.validate_field(&f, Some(&json!(""))), None);
    }

    #[test]
    fn required_message_is_translated_with_label() {
        let translator = CatalogTranslator::new()
            .with("person.name", "Name")
            .with(REQUIRED_KEY, "{field} is required");
        let engine = ValidationEngine::new(Arc::new(translator));
        let f = field(Domain::new("name").required());
        assert_eq!(
            engine.validate_field(&f, Some(&Value::Null)),
            Some("Name is required".into())
        );
        assert_eq!(engine.validate_field(&f, Some(&json!("Ann"))), None);
    }

    #[test]
    fn first_failing_validator_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let f = field(
            Domain::new("name")
                .validator(Validator::new("first", |_| Some("first".into())))
                .validator(Validator::new("second", move |_| {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Some("second".into())
                })),
        );
        let engine = ValidationEngine::default();
        assert_eq!(engine.validate_field(&f, Some(&json!("x"))), Some("first".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn validation_is_deterministic() {
        let f = field(
            Domain::new("name")
                .rules([Rule::MinLength {
                    min: 2,
                    message: Some("too short".into()),
                }])
                .unwrap(),
        );
        let engine = ValidationEngine::default();
        let value = json!("A");
        assert_eq!(
            engine.validate_field(&f, Some(&value)),
            engine.validate_field(&f, Some(&value))
        );
        assert_eq!(engine.validate_field(&f, Some(&value)), Some("too short".into()));
    }

    #[test]
    fn empty_detection() {
        assert!(is_empty_value(None));
        assert!(is_empty_value(Some(&json!([]))));
        assert!(!is_empty_value(Some(&json!(0))));
        assert!(!is_empty_value(Some(&json!(false))));
    }
}
