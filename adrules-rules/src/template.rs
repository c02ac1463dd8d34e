use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::draft::{RuleDraft, RulePatch};
use crate::error::RuleError;
use crate::loader;

const BUILTIN: &str = include_str!("../templates/builtin.yaml");

/// Reusable rule definition without a target entity set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleTemplate {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub rule: RuleDraft,
}

impl RuleTemplate {
    /// Rule draft for `entity_ids` with `overrides` merged on top.
    pub fn instantiate(&self, entity_ids: Vec<String>, overrides: &RulePatch) -> RuleDraft {
        let mut draft = self.rule.clone();
        draft.entity_ids = entity_ids;
        overrides.apply_to(draft)
    }

    /// Templates must yield a valid rule once entities are attached.
    fn check(&self, origin: &str) -> Result<(), RuleError> {
        let sample = self.instantiate(vec!["template-sample".into()], &RulePatch::default());
        sample.validate().map(|_| ()).map_err(|err| {
            RuleError::parse_error(origin, format!("template {:?} is invalid: {err}", self.key))
        })
    }
}

/// Body of a clone-from-template request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateInstance {
    pub entity_ids: Vec<String>,
    #[serde(default)]
    pub overrides: RulePatch,
}

/// Templates keyed by `key`, listed in key order.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, RuleTemplate>,
}

impl TemplateCatalog {
    /// Catalogue shipped with the binary.
    pub fn builtin() -> Result<Self, RuleError> {
        let templates = loader::parse_templates(BUILTIN, Path::new("builtin.yaml"))?;
        Self::from_templates(templates, "builtin.yaml")
    }

    /// Built-ins plus every template found under `path` (a file or a
    /// directory of `.yaml`/`.yml`/`.json` files).
    pub fn with_directory(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let mut catalog = Self::builtin()?;
        let path = path.as_ref();
        for template in loader::load_templates(path)? {
            template.check(&path.display().to_string())?;
            if catalog.templates.contains_key(&template.key) {
                return Err(RuleError::DuplicateTemplate { key: template.key });
            }
            catalog.templates.insert(template.key.clone(), template);
        }
        Ok(catalog)
    }

    pub fn from_templates(templates: Vec<RuleTemplate>, origin: &str) -> Result<Self, RuleError> {
        let mut catalog = Self::default();
        for template in templates {
            template.check(origin)?;
            if catalog.templates.contains_key(&template.key) {
                return Err(RuleError::DuplicateTemplate { key: template.key });
            }
            catalog.templates.insert(template.key.clone(), template);
        }
        Ok(catalog)
    }

    pub fn list(&self) -> Vec<&RuleTemplate> {
        self.templates.values().collect()
    }

    pub fn get(&self, key: &str) -> Result<&RuleTemplate, RuleError> {
        self.templates
            .get(key)
            .ok_or_else(|| RuleError::TemplateNotFound(key.to_string()))
    }

    pub fn instantiate(&self, key: &str, instance: &TemplateInstance) -> Result<RuleDraft, RuleError> {
        Ok(self
            .get(key)?
            .instantiate(instance.entity_ids.clone(), &instance.overrides))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
