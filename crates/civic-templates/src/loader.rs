//! Template Loading and Resolution
//!
//! Templates live at `<dir>/<type>/<name>.md` and partials at
//! `<dir>/partials/<name>.md`. A customization directory is searched
//! first, then the base directory, so deployments can shadow shipped
//! templates file by file. `extends: "parentType/parentName"` triggers a
//! recursive load of the parent chain and a merge.

use crate::definition::Template;
use crate::error::TemplateError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub struct TemplateLoader {
    base_dir: PathBuf,
    custom_dir: Option<PathBuf>,
}

impl TemplateLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            custom_dir: None,
        }
    }

    pub fn with_custom_dir(mut self, custom_dir: impl Into<PathBuf>) -> Self {
        self.custom_dir = Some(custom_dir.into());
        self
    }

    fn resolve_file(&self, relative: &str) -> Option<PathBuf> {
        if let Some(custom) = &self.custom_dir {
            let candidate = custom.join(relative);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        let candidate = self.base_dir.join(relative);
        candidate.is_file().then_some(candidate)
    }

    /// Load a template and resolve its inheritance chain into one merged
    /// template.
    pub fn load(&self, record_type: &str, name: &str) -> Result<Template, TemplateError> {
        let mut visited = HashSet::new();
        self.load_resolved(record_type, name, &mut visited)
    }

    fn load_resolved(
        &self,
        record_type: &str,
        name: &str,
        visited: &mut HashSet<String>,
    ) -> Result<Template, TemplateError> {
        let key = format!("{record_type}/{name}");
        if !visited.insert(key.clone()) {
            return Err(TemplateError::InheritanceCycle(key));
        }

        let child = self.load_single(record_type, name)?;
        let Some(parent_ref) = child.header.extends.clone() else {
            return Ok(child);
        };

        let (parent_type, parent_name) = parent_ref
            .split_once('/')
            .ok_or_else(|| TemplateError::BadReference(parent_ref.clone()))?;
        let parent = self.load_resolved(parent_type, parent_name, visited)?;
        Ok(Template::merge(&parent, &child))
    }

    fn load_single(&self, record_type: &str, name: &str) -> Result<Template, TemplateError> {
        let relative = format!("{record_type}/{name}.md");
        let path = self
            .resolve_file(&relative)
            .ok_or_else(|| TemplateError::NotFound {
                record_type: record_type.to_string(),
                name: name.to_string(),
            })?;
        let text = std::fs::read_to_string(&path)?;
        Template::parse(&text, &path.display().to_string())
    }

    /// Load a partial body by name, custom directory first. Returns None
    /// for unknown partials; the expander renders an inline marker.
    pub fn load_partial(&self, name: &str) -> Result<Option<String>, TemplateError> {
        let relative = format!("partials/{name}.md");
        match self.resolve_file(&relative) {
            Some(path) => Ok(Some(std::fs::read_to_string(path)?)),
            None => Ok(None),
        }
    }

    /// Names of all templates available for a record type, custom
    /// additions included, sorted and deduplicated.
    pub fn list(&self, record_type: &str) -> Result<Vec<String>, TemplateError> {
        let mut names = Vec::new();
        for dir in [self.custom_dir.as_deref(), Some(self.base_dir.as_path())]
            .into_iter()
            .flatten()
        {
            collect_template_names(&dir.join(record_type), &mut names)?;
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

fn collect_template_names(dir: &Path, names: &mut Vec<String>) -> Result<(), TemplateError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("md") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_resolves_parent_chain() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "document/base.md",
            "---\nname: base\ntype: document\nrequired_fields: [title]\n---\n\nShared body\n",
        );
        write(
            tmp.path(),
            "policy/default.md",
            "---\nname: default\ntype: policy\nextends: \"document/base\"\nrequired_fields: [department]\n---\n",
        );

        let loader = TemplateLoader::new(tmp.path());
        let template = loader.load("policy", "default").unwrap();
        assert_eq!(template.header.required_fields, vec!["title", "department"]);
        assert_eq!(template.body, "Shared body\n");
        assert!(template.header.extends.is_none());
    }

    #[test]
    fn test_custom_dir_shadows_base() {
        let base = tempfile::tempdir().unwrap();
        let custom = tempfile::tempdir().unwrap();
        write(
            base.path(),
            "policy/default.md",
            "---\nname: default\ntype: policy\n---\n\nBase body\n",
        );
        write(
            custom.path(),
            "policy/default.md",
            "---\nname: default\ntype: policy\n---\n\nCustom body\n",
        );

        let loader = TemplateLoader::new(base.path()).with_custom_dir(custom.path());
        let template = loader.load("policy", "default").unwrap();
        assert_eq!(template.body, "Custom body\n");
    }

    #[test]
    fn test_inheritance_cycle_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "policy/a.md",
            "---\nname: a\ntype: policy\nextends: \"policy/b\"\n---\n",
        );
        write(
            tmp.path(),
            "policy/b.md",
            "---\nname: b\ntype: policy\nextends: \"policy/a\"\n---\n",
        );

        let loader = TemplateLoader::new(tmp.path());
        let err = loader.load("policy", "a").unwrap_err();
        assert!(matches!(err, TemplateError::InheritanceCycle(_)));
    }

    #[test]
    fn test_list_merges_both_directories() {
        let base = tempfile::tempdir().unwrap();
        let custom = tempfile::tempdir().unwrap();
        write(base.path(), "bylaw/default.md", "---\nname: default\ntype: bylaw\n---\n");
        write(base.path(), "bylaw/noise.txt", "not a template");
        write(custom.path(), "bylaw/special.md", "---\nname: special\ntype: bylaw\n---\n");

        let loader = TemplateLoader::new(base.path()).with_custom_dir(custom.path());
        assert_eq!(loader.list("bylaw").unwrap(), vec!["default", "special"]);
        assert!(loader.list("ordinance").unwrap().is_empty());
    }

    #[test]
    fn test_missing_template_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = TemplateLoader::new(tmp.path());
        let err = loader.load("policy", "nope").unwrap_err();
        assert!(matches!(err, TemplateError::NotFound { .. }));
    }
}
