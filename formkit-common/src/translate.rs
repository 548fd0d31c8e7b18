//! String lookup service
//!
//! Validation messages and labels are produced as translation keys. The
//! embedder supplies a [`Translate`] implementation; formkit only forwards
//! keys and `{placeholder}` parameters.

use std::collections::HashMap;

/// Key → user-visible text lookup.
///
/// Implementations are shared between form instances and validators, hence
/// the `Send + Sync` bound.
pub trait Translate: Send + Sync {
    /// Translate `key`, substituting `{name}` placeholders from `params`.
    fn translate(&self, key: &str, params: &[(&str, &str)]) -> String;
}

/// Returns the key itself, with placeholders substituted.
///
/// Useful in tests and as a default when no catalog is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyTranslator;

impl Translate for KeyTranslator {
    fn translate(&self, key: &str, params: &[(&str, &str)]) -> String {
        interpolate(key, params)
    }
}

/// In-memory catalog of templates; unknown keys fall back to the key.
#[derive(Debug, Clone, Default)]
pub struct CatalogTranslator {
    templates: HashMap<String, String>,
}

impl CatalogTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template for `key`.
    pub fn with(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(key.into(), template.into());
        self
    }
}

impl Translate for CatalogTranslator {
    fn translate(&self, key: &str, params: &[(&str, &str)]) -> String {
        match self.templates.get(key) {
            Some(template) => interpolate(template, params),
            None => interpolate(key, params),
        }
    }
}

/// Replace `{name}` placeholders in one pass. Substituted values are not
/// scanned again, and unknown placeholders stay as written.
fn interpolate(template: &str, params: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            params
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_translator_returns_key() {
        assert_eq!(KeyTranslator.translate("validation.required", &[]), "validation.required");
    }

    #[test]
    fn catalog_substitutes_params() {
        let catalog = CatalogTranslator::new().with("validation.min-length", "at least {min} characters");
        assert_eq!(
            catalog.translate("validation.min-length", &[("min", "2")]),
            "at least 2 characters"
        );
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let catalog = CatalogTranslator::new().with("range", "{field} between {min} and {max}");
        assert_eq!(
            catalog.translate("range", &[("field", "{max}"), ("min", "1"), ("max", "9")]),
            "{max} between 1 and 9"
        );
        assert_eq!(
            catalog.translate("range", &[("min", "1")]),
            "{field} between 1 and {max}"
        );
        assert_eq!(interpolate("{ {min}} {", &[("min", "0")]), "{ 0} {");
    }

    #[test]
    fn catalog_falls_back_to_key() {
        let catalog = CatalogTranslator::new();
        assert_eq!(catalog.translate("missing.key", &[]), "missing.key");
    }
}
