use crate::error::{NugradeError, Result};
use regex::Regex;

/// Assigns a manifest path to a named file group.
#[derive(Debug, Clone)]
pub enum FileGroupRule {
    /// `name` when the path contains `fragment`, ignoring case and slash direction.
    PathContains { name: String, fragment: String },
    /// Name taken from the first capture group of `regex`.
    PathRegex { regex: Regex },
}

impl FileGroupRule {
    pub fn path_contains(name: &str, fragment: &str) -> Self {
        FileGroupRule::PathContains {
            name: name.to_string(),
            fragment: normalize_path(fragment).to_lowercase(),
        }
    }

    pub fn path_regex(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            NugradeError::Config(format!("Invalid file group pattern '{}': {}", pattern, e))
        })?;
        Ok(FileGroupRule::PathRegex { regex })
    }

    pub fn group_name(&self, path: &str) -> Option<String> {
        let normalized = normalize_path(path);

        match self {
            FileGroupRule::PathContains { name, fragment } => normalized
                .to_lowercase()
                .contains(fragment.as_str())
                .then(|| name.clone()),
            FileGroupRule::PathRegex { regex } => {
                let captures = regex.captures(&normalized)?;
                let matched = captures.get(1).or_else(|| captures.get(0))?;
                let name = matched
                    .as_str()
                    .trim_matches(|c| c == '/' || c == '\\')
                    .replace(' ', "-");
                (!name.is_empty()).then_some(name)
            }
        }
    }
}

/// Ordered file group rules; the first match wins. Empty means "no file grouping".
#[derive(Debug, Clone, Default)]
pub struct FileGrouping {
    rules: Vec<FileGroupRule>,
}

impl FileGrouping {
    pub fn new(rules: Vec<FileGroupRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn resolve(&self, path: &str) -> Option<String> {
        self.rules.iter().find_map(|rule| rule.group_name(path))
    }
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}
