use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::RuleError;
use crate::template::RuleTemplate;

/// Loads templates from a single file or every `.json`/`.yaml`/`.yml` file in
/// a directory, sorted by key.
pub fn load_templates(path: impl AsRef<Path>) -> Result<Vec<RuleTemplate>, RuleError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RuleError::MissingPath(path.display().to_string()));
    }

    let mut templates = if path.is_dir() {
        load_from_directory(path)?
    } else {
        load_from_file(path)?
    };

    deduplicate(&templates)?;
    templates.sort_by(|a, b| a.key.cmp(&b.key));

    Ok(templates)
}

fn load_from_directory(path: &Path) -> Result<Vec<RuleTemplate>, RuleError> {
    let mut templates = Vec::new();
    for entry in fs::read_dir(path).map_err(|err| RuleError::from_io(path, err))? {
        let entry = entry.map_err(|err| RuleError::from_io(path, err))?;
        let file_type = entry
            .file_type()
            .map_err(|err| RuleError::from_io(entry.path(), err))?;
        if file_type.is_dir() {
            continue;
        }

        if let Some(ext) = entry.path().extension().and_then(|value| value.to_str()) {
            if matches!(ext, "json" | "yaml" | "yml") {
                let mut file_templates = load_from_file(&entry.path())?;
                templates.append(&mut file_templates);
            }
        }
    }

    Ok(templates)
}

fn load_from_file(path: &Path) -> Result<Vec<RuleTemplate>, RuleError> {
    let raw = fs::read_to_string(path).map_err(|err| RuleError::from_io(path, err))?;
    parse_templates(&raw, path)
}

/// Accepts a `templates:` document, a bare list, or a single template.
/// JSON parses through the same path since it is valid YAML.
pub fn parse_templates(raw: &str, path: &Path) -> Result<Vec<RuleTemplate>, RuleError> {
    let mut attempts = Vec::new();

    match serde_yaml::from_str::<TemplateDocument>(raw) {
        Ok(doc) => return Ok(doc.templates),
        Err(err) => attempts.push(format!("templates document: {err}")),
    }

    match serde_yaml::from_str::<Vec<RuleTemplate>>(raw) {
        Ok(list) => return Ok(list),
        Err(err) => attempts.push(format!("list: {err}")),
    }

    match serde_yaml::from_str::<RuleTemplate>(raw) {
        Ok(template) => return Ok(vec![template]),
        Err(err) => attempts.push(format!("single: {err}")),
    }

    Err(RuleError::parse_error(
        path.to_path_buf(),
        format!("unable to parse templates ({})", attempts.join("; ")),
    ))
}

fn deduplicate(templates: &[RuleTemplate]) -> Result<(), RuleError> {
    let mut seen = HashSet::new();
    for template in templates {
        if !seen.insert(template.key.as_str()) {
            return Err(RuleError::DuplicateTemplate {
                key: template.key.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct TemplateDocument {
    templates: Vec<RuleTemplate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_templates(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, RuleError::MissingPath(_)));
    }

    #[test]
    fn json_list_and_non_template_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"[{"key": "b", "name": "B", "rule": {}}, {"key": "a", "name": "A", "rule": {}}]"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let templates = load_templates(dir.path()).unwrap();
        assert_eq!(
            templates.iter().map(|t| t.key.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.yaml");
        fs::write(&file, "- just\n- strings\n").unwrap();
        assert!(matches!(load_templates(&file), Err(RuleError::Parse { .. })));
    }
}
