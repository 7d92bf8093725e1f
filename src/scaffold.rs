// Project scaffolding: writes a fetched template into a project directory.
//
// Names are validated and conflicts checked for the whole template before
// the first file is written.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::api::TemplateFile;
use crate::error::ScaffoldError;

/// A template resolved against a project root, ready to write.
#[derive(Debug)]
pub struct ScaffoldPlan {
    files: Vec<(PathBuf, TemplateFile)>,
    conflicts: Vec<String>,
}

impl ScaffoldPlan {
    /// Resolves every template name under `root`.
    ///
    /// Fails before anything is written when a name escapes `root`,
    /// repeats, or needs a path that is a file in one place and a directory
    /// in another (inside the template or against what is on disk).
    pub fn new(root: &Path, template: Vec<TemplateFile>) -> Result<Self, ScaffoldError> {
        let mut files = Vec::with_capacity(template.len());
        let mut conflicts = Vec::new();
        let mut names: BTreeMap<PathBuf, String> = BTreeMap::new();

        for file in template {
            let rel = safe_relative(&file.name)?;
            if let Some(first) = names.get(&rel) {
                return Err(ScaffoldError::Clash(first.clone(), file.name));
            }
            names.insert(rel.clone(), file.name.clone());

            let target = root.join(&rel);
            for ancestor in rel.ancestors().skip(1).filter(|a| !a.as_os_str().is_empty()) {
                if root.join(ancestor).is_file() {
                    return Err(ScaffoldError::Clash(ancestor.display().to_string(), file.name));
                }
            }
            if target.is_dir() {
                return Err(ScaffoldError::Clash(file.name.clone(), file.name));
            }
            if target.exists() {
                conflicts.push(file.name.clone());
            }
            files.push((target, file));
        }

        // A name that is also the parent directory of another name.
        for (rel, name) in &names {
            if let Some(parent) = rel.ancestors().skip(1).find(|a| names.contains_key(*a)) {
                return Err(ScaffoldError::Clash(names[parent].clone(), name.clone()));
            }
        }

        Ok(Self { files, conflicts })
    }

    /// Template names that already exist on disk.
    pub fn conflicts(&self) -> &[String] {
        &self.conflicts
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Writes every file, creating parent directories. Refuses to touch
    /// existing files unless `overwrite` is set. `on_write` sees each
    /// template name as it lands.
    pub fn write(self, overwrite: bool, mut on_write: impl FnMut(&str)) -> Result<(), ScaffoldError> {
        if !overwrite && !self.conflicts.is_empty() {
            return Err(ScaffoldError::Conflicts(self.conflicts));
        }
        for (target, file) in self.files {
            let write_err = |source| ScaffoldError::Write {
                path: target.clone(),
                source,
            };
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
            std::fs::write(&target, file.body.as_bytes()).map_err(write_err)?;
            tracing::debug!(path = %target.display(), "wrote template file");
            on_write(&file.name);
        }
        Ok(())
    }
}

fn safe_relative(name: &str) -> Result<PathBuf, ScaffoldError> {
    let unsafe_name = || ScaffoldError::UnsafeName(name.to_string());
    let path = Path::new(name);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_name())
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(unsafe_name());
    }
    Ok(out)
}
