use std::fs;
use std::path::Path;

use adrules_rules::{load_templates, RuleDraft, RuleError, RulePatch, TemplateCatalog, ValidationError};
use anyhow::{bail, Context};
use colored::*;

pub fn load_catalog(path: Option<&Path>) -> Result<TemplateCatalog, RuleError> {
    match path {
        Some(path) => TemplateCatalog::with_directory(path),
        None => TemplateCatalog::builtin(),
    }
}

pub fn print_templates(catalog: &TemplateCatalog) {
    println!("{} ({})", "Rule templates".bold(), catalog.len());
    for template in catalog.list() {
        let rule = &template.rule;
        println!(
            "  {} {}",
            template.key.cyan().bold(),
            format!(
                "[{} {} → {}]",
                rule.entity_type.as_deref().unwrap_or("?"),
                rule.evaluation_type.as_deref().unwrap_or("?"),
                rule.execution_type.as_deref().unwrap_or("?"),
            )
            .dimmed()
        );
        println!("    {}", template.name);
        if let Some(description) = &template.description {
            println!("    {}", description.dimmed());
        }
    }
}

/// Outcome of checking every rule found in a file.
pub struct ValidationReport {
    pub checked: Vec<(String, Result<(), ValidationError>)>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.checked.iter().all(|(_, result)| result.is_ok())
    }
}

/// Accepts a template document or a single rule draft. Templates are checked
/// with a placeholder entity attached, the way the catalogue does on load.
pub fn validate_file(path: &Path) -> anyhow::Result<ValidationReport> {
    let template_error = match load_templates(path) {
        Ok(templates) => {
            let checked = templates
                .iter()
                .map(|template| {
                    let sample = template.instantiate(vec!["template-sample".into()], &RulePatch::default());
                    (template.key.clone(), sample.validate().map(|_| ()))
                })
                .collect();
            return Ok(ValidationReport { checked });
        }
        Err(err @ (RuleError::MissingPath(_) | RuleError::Io { .. })) => return Err(err.into()),
        Err(err) => err,
    };

    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let draft: RuleDraft = match serde_yaml::from_str(&raw) {
        Ok(draft) => draft,
        Err(rule_error) => bail!(
            "{} is neither a template document ({template_error}) nor a rule ({rule_error})",
            path.display()
        ),
    };
    let name = draft.name.clone().unwrap_or_else(|| "<unnamed rule>".into());
    Ok(ValidationReport {
        checked: vec![(name, draft.validate().map(|_| ()))],
    })
}

pub fn print_validation(path: &Path, report: &ValidationReport) {
    for (subject, result) in &report.checked {
        match result {
            Ok(()) => println!("{} {}", "✔".green().bold(), subject.bold()),
            Err(err) => {
                println!("{} {}", "✘".red().bold(), subject.bold());
                for violation in &err.violations {
                    println!(
                        "    {} {}: {}",
                        violation.code.yellow(),
                        violation.field,
                        violation.message
                    );
                }
            }
        }
    }

    let summary = format!("{}: {} checked", path.display(), report.checked.len());
    if report.is_valid() {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn rule_drafts_report_every_violation() {
        let file = write_file(
            r#"
name: Broken
entity_type: CAMPAIGN
entity_ids: [c-1]
evaluation_type: TRIGGER
conditions:
  - { field: ctr, operator: SOMETIMES, value: 1.0 }
execution_type: CHANGE_BUDGET
"#,
        );

        let report = validate_file(file.path()).unwrap();
        assert!(!report.is_valid());
        let (subject, result) = &report.checked[0];
        assert_eq!(subject, "Broken");
        let err = result.as_ref().unwrap_err();
        assert!(err.has_field("conditions[0].operator"));
        assert!(err.violations.len() >= 2);
    }

    #[test]
    fn template_documents_are_checked_per_key() {
        let file = write_file(
            r#"
templates:
  - key: pause-fatigued-ads
    name: Pause fatigued ads
    rule:
      name: Pause fatigued ads
      entity_type: AD
      evaluation_type: TRIGGER
      conditions:
        - { field: frequency, operator: GREATER_THAN, value: 4 }
      execution_type: PAUSE
"#,
        );

        let report = validate_file(file.path()).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.checked[0].0, "pause-fatigued-ads");
    }

    #[test]
    fn unreadable_documents_are_errors() {
        let file = write_file("- just\n- a list\n");
        assert!(validate_file(file.path()).is_err());
    }

    #[test]
    fn builtin_catalog_loads_without_a_path() {
        let catalog = load_catalog(None).unwrap();
        assert!(catalog.get("pause-low-ctr").is_ok());
    }
}
