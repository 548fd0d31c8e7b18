//! EntityRegistry: resolves entity names to their metadata.
//!
//! Entities and shared domains are registered in code or loaded from a
//! directory of YAML files. Once built the registry is immutable and shared
//! behind `Arc`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{FieldsError, Result};
use crate::types::{Domain, EntityDef, EntryDef, FieldDef, FieldType, Rule};

/// YAML form of a shared domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainSpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
}

impl DomainSpec {
    fn into_domain(self) -> Result<Domain> {
        let domain = Domain::new(self.name).rules(self.rules)?;
        Ok(if self.required {
            domain.required()
        } else {
            domain
        })
    }
}

/// YAML form of one entity entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EntrySpec {
    Field {
        name: String,
        #[serde(rename = "type", default)]
        field_type: FieldType,
        /// Name of a shared domain; inline `required`/`rules` are ignored when set.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        domain: Option<String>,
        #[serde(default)]
        required: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        rules: Vec<Rule>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        translation_key: Option<String>,
    },
    Object {
        name: String,
        entity: String,
    },
    List {
        name: String,
        entity: String,
    },
}

/// YAML form of an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default)]
    pub entries: Vec<EntrySpec>,
}

impl EntitySpec {
    fn into_def(self, domains: &HashMap<String, Arc<Domain>>) -> Result<EntityDef> {
        let mut builder = EntityDef::builder(self.name.clone());
        if let Some(identity) = self.identity {
            builder = builder.identity(identity);
        }
        for entry in self.entries {
            builder = match entry {
                EntrySpec::Field {
                    name,
                    field_type,
                    domain,
                    required,
                    rules,
                    translation_key,
                } => {
                    let domain = match domain {
                        Some(domain_name) => {
                            if required || !rules.is_empty() {
                                warn!(entity = %self.name, field = %name, domain = %domain_name,
                                    "inline rules ignored for field with shared domain");
                            }
                            domains.get(&domain_name).cloned().ok_or(
                                FieldsError::DomainNotFound { name: domain_name },
                            )?
                        }
                        None => Arc::new(
                            DomainSpec {
                                name: format!("{}.{}", self.name, name),
                                required,
                                rules,
                            }
                            .into_domain()?,
                        ),
                    };
                    let translation_key =
                        translation_key.unwrap_or_else(|| format!("{}.{}", self.name, name));
                    builder.field_def(FieldDef {
                        name,
                        translation_key,
                        field_type,
                        domain,
                    })
                }
                EntrySpec::Object { name, entity } => builder.object(name, entity),
                EntrySpec::List { name, entity } => builder.list(name, entity),
            };
        }
        builder.build()
    }
}

/// Builder for [`EntityRegistry`].
#[derive(Default)]
pub struct EntityRegistryBuilder {
    domains: HashMap<String, Arc<Domain>>,
    entities: Vec<EntityDef>,
}

impl EntityRegistryBuilder {
    /// Register a shared domain, replacing any domain with the same name.
    ///
    /// Domains registered here can be referenced by name from YAML entities,
    /// which is how closure validators reach metadata loaded from disk.
    pub fn domain(mut self, domain: Domain) -> Self {
        self.domains
            .insert(domain.name().to_string(), Arc::new(domain));
        self
    }

    /// Register an entity definition.
    pub fn entity(mut self, def: EntityDef) -> Self {
        self.entities.push(def);
        self
    }

    /// Register an entity from a YAML document.
    pub fn entity_yaml(self, yaml: &str) -> Result<Self> {
        let spec: EntitySpec = serde_yaml_ng::from_str(yaml)?;
        let def = spec.into_def(&self.domains)?;
        Ok(self.entity(def))
    }

    /// Register a shared domain from a YAML document.
    pub fn domain_yaml(self, yaml: &str) -> Result<Self> {
        let spec: DomainSpec = serde_yaml_ng::from_str(yaml)?;
        Ok(self.domain(spec.into_domain()?))
    }

    /// Load `domains/*.yaml` then `entities/*.yaml` under `root`.
    ///
    /// ```text
    /// metadata/
    ///   domains/     ← one .yaml per shared domain
    ///   entities/    ← one .yaml per entity
    /// ```
    ///
    /// Files that fail to parse, or that name unknown domains or carry
    /// invalid rules, are skipped with a warning.
    pub async fn load_dir(mut self, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(FieldsError::NotInitialized {
                path: root.to_path_buf(),
            });
        }

        for (path, content) in read_yaml_files(&root.join("domains")).await? {
            let loaded = serde_yaml_ng::from_str::<DomainSpec>(&content)
                .map_err(FieldsError::from)
                .and_then(DomainSpec::into_domain);
            match loaded {
                Ok(domain) => {
                    debug!(name = %domain.name(), "loaded domain");
                    self = self.domain(domain);
                }
                Err(e) => warn!(?path, %e, "skipping invalid domain definition"),
            }
        }

        for (path, content) in read_yaml_files(&root.join("entities")).await? {
            let loaded = serde_yaml_ng::from_str::<EntitySpec>(&content)
                .map_err(FieldsError::from)
                .and_then(|spec| spec.into_def(&self.domains));
            match loaded {
                Ok(def) => {
                    debug!(name = %def.name(), "loaded entity");
                    self = self.entity(def);
                }
                Err(e) => warn!(?path, %e, "skipping invalid entity definition"),
            }
        }

        Ok(self)
    }

    /// Build the registry, checking that every object and list entry resolves.
    pub fn build(self) -> Result<EntityRegistry> {
        let mut entities = HashMap::with_capacity(self.entities.len());
        for def in self.entities {
            let name = def.name().to_string();
            if entities.insert(name.clone(), Arc::new(def)).is_some() {
                return Err(FieldsError::DuplicateEntity { name });
            }
        }

        for def in entities.values() {
            for (entry_name, entry) in def.entries() {
                if let Some(target) = entry.target() {
                    if !entities.contains_key(target) {
                        return Err(FieldsError::UnresolvedReference {
                            entity: def.name().to_string(),
                            entry: entry_name.to_string(),
                            target: target.to_string(),
                        });
                    }
                }
            }
        }

        debug!(
            entities = entities.len(),
            domains = self.domains.len(),
            "entity registry built"
        );

        Ok(EntityRegistry {
            entities,
            domains: self.domains,
        })
    }
}

/// Sorted `(path, content)` pairs for the .yaml files in `dir`; empty if missing.
async fn read_yaml_files(dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let content = fs::read_to_string(&path).await?;
        files.push((path, content));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Immutable name → entity lookup.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, Arc<EntityDef>>,
    domains: HashMap<String, Arc<Domain>>,
}

impl EntityRegistry {
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::default()
    }

    /// Resolve an entity by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<EntityDef>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| FieldsError::EntityNotFound {
                name: name.to_string(),
            })
    }

    /// Get a shared domain by name.
    pub fn domain(&self, name: &str) -> Option<Arc<Domain>> {
        self.domains.get(name).cloned()
    }

    /// All registered entities, in no particular order.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDef>> {
        self.entities.values()
    }

    /// Resolve the entity referenced by an object or list entry.
    pub fn resolve_entry(&self, entry: &EntryDef) -> Option<Arc<EntityDef>> {
        entry.target().and_then(|target| self.entities.get(target).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Validator;
    use crate::validation::ValidationEngine;
    use serde_json::json;
    use tempfile::TempDir;

    const PERSON_YAML: &str = r#"
name: person
identity: id
entries:
  - kind: field
    name: id
  - kind: field
    name: name
    required: true
    rules:
      - kind: min-length
        min: 2
        message: too short
  - kind: field
    name: email
    domain: email
  - kind: object
    name: address
    entity: address
  - kind: list
    name: phones
    entity: phone
"#;

    fn address() -> EntityDef {
        EntityDef::builder("address").text("city").build().unwrap()
    }

    fn phone() -> EntityDef {
        EntityDef::builder("phone").text("number").build().unwrap()
    }

    fn email_domain() -> Domain {
        Domain::new("email")
            .rules([Rule::Email { message: None }])
            .unwrap()
    }

    #[test]
    fn resolve_registered_entity() {
        let registry = EntityRegistry::builder()
            .entity(address())
            .build()
            .unwrap();
        assert_eq!(registry.resolve("address").unwrap().name(), "address");
        assert!(matches!(
            registry.resolve("nope"),
            Err(FieldsError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn unresolved_reference_fails_build() {
        let person = EntityDef::builder("person")
            .object("address", "address")
            .build()
            .unwrap();
        let err = EntityRegistry::builder().entity(person).build().unwrap_err();
        assert!(matches!(err, FieldsError::UnresolvedReference { target, .. } if target == "address"));
    }

    #[test]
    fn duplicate_entity_fails_build() {
        let err = EntityRegistry::builder()
            .entity(address())
            .entity(address())
            .build()
            .unwrap_err();
        assert!(matches!(err, FieldsError::DuplicateEntity { .. }));
    }

    #[test]
    fn yaml_entity_shares_named_domain() {
        let registry = EntityRegistry::builder()
            .domain(email_domain())
            .entity(address())
            .entity(phone())
            .entity_yaml(PERSON_YAML)
            .unwrap()
            .build()
            .unwrap();

        let person = registry.resolve("person").unwrap();
        assert_eq!(person.identity(), Some("id"));
        let email = person.field("email").unwrap();
        assert!(Arc::ptr_eq(&email.domain, &registry.domain("email").unwrap()));

        let engine = ValidationEngine::default();
        let name = person.field("name").unwrap();
        assert_eq!(engine.validate_field(name, Some(&json!("A"))), Some("too short".into()));
        assert_eq!(
            engine.validate_field(name, None),
            Some("validation.required".into())
        );
    }

    #[test]
    fn yaml_entity_with_unknown_domain_fails() {
        let err = EntityRegistry::builder()
            .entity_yaml(PERSON_YAML)
            .err()
            .unwrap();
        assert!(matches!(err, FieldsError::DomainNotFound { name } if name == "email"));
    }

    #[test]
    fn code_domain_with_closure_validator_is_reachable_from_yaml() {
        let domain = Domain::new("email").validator(Validator::new("corporate", |v| {
            (!v.as_str().unwrap_or_default().ends_with("@corp.example")).then(|| "corporate only".into())
        }));
        let registry = EntityRegistry::builder()
            .domain(domain)
            .entity(address())
            .entity(phone())
            .entity_yaml(PERSON_YAML)
            .unwrap()
            .build()
            .unwrap();
        let email = registry.resolve("person").unwrap();
        let engine = ValidationEngine::default();
        assert_eq!(
            engine.validate_field(email.field("email").unwrap(), Some(&json!("a@b.c"))),
            Some("corporate only".into())
        );
    }

    #[test_log::test(tokio::test)]
    async fn load_dir_reads_domains_and_entities() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("domains")).unwrap();
        std::fs::create_dir_all(root.join("entities")).unwrap();
        std::fs::write(
            root.join("domains/email.yaml"),
            "name: email\nrules:\n  - kind: email\n",
        )
        .unwrap();
        std::fs::write(root.join("entities/person.yaml"), PERSON_YAML).unwrap();
        std::fs::write(
            root.join("entities/address.yaml"),
            "name: address\nentries:\n  - kind: field\n    name: city\n",
        )
        .unwrap();
        std::fs::write(
            root.join("entities/phone.yaml"),
            "name: phone\nentries:\n  - kind: field\n    name: number\n",
        )
        .unwrap();
        std::fs::write(root.join("entities/broken.yaml"), "entries: [").unwrap();
        std::fs::write(root.join("entities/notes.txt"), "ignored").unwrap();

        let registry = EntityRegistry::builder()
            .load_dir(root)
            .await
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(registry.entities().count(), 3);
        assert!(registry.domain("email").is_some());
        let person = registry.resolve("person").unwrap();
        assert_eq!(person.len(), 5);
    }

    #[tokio::test]
    async fn load_dir_missing_root_errors() {
        let temp = TempDir::new().unwrap();
        let err = EntityRegistry::builder()
            .load_dir(temp.path().join("missing"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FieldsError::NotInitialized { .. }));
    }
}
