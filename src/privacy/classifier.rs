use crate::core::config::{normalize_extension, PrivacyRules, Settings};
use crate::core::error::{Error, Result};
use crate::core::tier::PrivacyTier;
use globset::{Glob, GlobMatcher, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::path::Path;

/// Tier assigned when neither a path rule nor an extension rule matches
pub const DEFAULT_TIER: PrivacyTier = PrivacyTier::Personal;

/// Maps file paths to privacy tiers and decides which paths are indexable.
///
/// Built once from static settings; classification is a pure function of
/// those rules and the path.
#[derive(Debug, Clone)]
pub struct PrivacyClassifier {
    path_rules: Vec<(GlobMatcher, PrivacyTier)>,
    extension_rules: HashMap<String, PrivacyTier>,
    exclusions: GlobSet,
}

impl PrivacyClassifier {
    pub fn new(rules: &PrivacyRules, exclude_patterns: &[String]) -> Result<Self> {
        let mut path_rules = Vec::with_capacity(rules.paths.len());
        for (pattern, tier) in &rules.paths {
            path_rules.push((compile(pattern)?.compile_matcher(), *tier));
        }

        let mut extension_rules = HashMap::new();
        for (ext, tier) in &rules.extensions {
            extension_rules.entry(normalize_extension(ext)).or_insert(*tier);
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in exclude_patterns {
            builder.add(compile(pattern)?);
        }
        let exclusions = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build exclusion set: {}", e)))?;

        Ok(Self {
            path_rules,
            extension_rules,
            exclusions,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(&settings.privacy.rules, &settings.indexing.exclude_dirs)
    }

    /// Path rules first (in configured order), then extension rules, then the default.
    pub fn classify(&self, path: &Path) -> PrivacyTier {
        if let Some((_, tier)) = self.path_rules.iter().find(|(m, _)| m.is_match(path)) {
            return *tier;
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.extension_rules.get(&ext.to_lowercase()))
            .copied()
            .unwrap_or(DEFAULT_TIER)
    }

    /// False when any path segment matches an exclusion pattern.
    pub fn should_index(&self, path: &Path) -> bool {
        !path
            .components()
            .any(|part| self.exclusions.is_match(part.as_os_str()))
    }
}

fn compile(pattern: &str) -> Result<Glob> {
    Glob::new(pattern).map_err(|e| Error::Config(format!("Invalid glob '{}': {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> PrivacyClassifier {
        let rules = PrivacyRules {
            paths: vec![
                ("*/secrets/*".to_string(), PrivacyTier::Private),
                ("*/work/*".to_string(), PrivacyTier::Work),
            ],
            extensions: vec![
                (".txt".to_string(), PrivacyTier::Personal),
                ("PY".to_string(), PrivacyTier::Work),
                (".md".to_string(), PrivacyTier::Public),
            ],
        };
        let excludes = vec![".git".to_string(), "node_modules".to_string(), "*.tmp".to_string()];
        PrivacyClassifier::new(&rules, &excludes).unwrap()
    }

    #[test]
    fn test_path_rule_beats_extension_rule() {
        let c = classifier();
        assert_eq!(c.classify(Path::new("~/secrets/passwords.txt")), PrivacyTier::Private);
        assert_eq!(c.classify(Path::new("/home/me/secrets/notes.md")), PrivacyTier::Private);
    }

    #[test]
    fn test_first_path_rule_wins() {
        let c = classifier();
        assert_eq!(c.classify(Path::new("/home/me/secrets/work/plan.md")), PrivacyTier::Private);
        assert_eq!(c.classify(Path::new("/home/me/work/secrets/plan.md")), PrivacyTier::Private);
        assert_eq!(c.classify(Path::new("/home/me/work/plan.md")), PrivacyTier::Work);
    }

    #[test]
    fn test_extension_rules_and_default() {
        let c = classifier();
        assert_eq!(c.classify(Path::new("/home/me/diary.txt")), PrivacyTier::Personal);
        assert_eq!(c.classify(Path::new("/home/me/tool.Py")), PrivacyTier::Work);
        assert_eq!(c.classify(Path::new("/home/me/readme.md")), PrivacyTier::Public);
        assert_eq!(c.classify(Path::new("/home/me/data.csv")), DEFAULT_TIER);
        assert_eq!(c.classify(Path::new("/home/me/Makefile")), DEFAULT_TIER);
    }

    #[test]
    fn test_should_index_exclusions() {
        let c = classifier();
        assert!(c.should_index(Path::new("/home/me/notes/todo.md")));
        assert!(!c.should_index(Path::new("/home/me/repo/.git/config")));
        assert!(!c.should_index(Path::new("/home/me/app/node_modules/pkg/readme.md")));
        assert!(!c.should_index(Path::new("/home/me/draft.tmp")));
        // Exclusion is independent of tier
        assert!(!c.should_index(Path::new("/home/me/secrets/.git/x.txt")));
    }

    #[test]
    fn test_invalid_glob_is_config_error() {
        let rules = PrivacyRules {
            paths: vec![("[oops".to_string(), PrivacyTier::Work)],
            extensions: vec![],
        };
        assert!(matches!(PrivacyClassifier::new(&rules, &[]), Err(Error::Config(_))));
    }
}
