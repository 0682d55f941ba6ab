use super::error::{Error, Result};
use super::tier::PrivacyTier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Configuration for tierdex
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for tierdex data
    pub base_dir: PathBuf,
    /// Directory holding the partitioned document store
    pub database_dir: PathBuf,
    /// Path to the fingerprint store
    pub state_path: PathBuf,
    /// Path to the YAML settings file
    pub config_path: PathBuf,
    /// Static settings, loaded once
    pub settings: Settings,
}

impl Config {
    /// Get the default configuration directory
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))
            .map(|home| home.join(".tierdex"))
    }

    /// Create a configuration with default settings
    pub fn new(base_dir: Option<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.unwrap_or_else(|| {
            Self::default_base_dir().unwrap_or_else(|_| PathBuf::from(".tierdex"))
        });

        Ok(Self {
            database_dir: base_dir.join("database"),
            state_path: base_dir.join("state").join("state.redb"),
            config_path: base_dir.join(CONFIG_FILE_NAME),
            settings: Settings::default(),
            base_dir,
        })
    }

    /// Load the configuration, reading settings from `<base_dir>/config.yaml`.
    ///
    /// A missing or malformed settings file is a fatal configuration error.
    pub fn load(base_dir: Option<PathBuf>) -> Result<Self> {
        let config = Self::new(base_dir)?;
        if !config.config_path.exists() {
            return Err(Error::Config(format!(
                "Settings file not found at {}. Run 'tierdex init' first.",
                config.config_path.display()
            )));
        }
        let yaml = std::fs::read_to_string(&config.config_path)?;
        let settings = Settings::from_yaml(&yaml)?;
        Ok(config.with_settings(settings))
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Initialize the directories and write default settings if none exist
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(&self.database_dir)?;
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !self.config_path.exists() {
            std::fs::write(&self.config_path, self.settings.to_yaml()?)?;
        }
        Ok(())
    }

    /// Check if the configuration is already initialized
    pub fn is_initialized(&self) -> bool {
        self.base_dir.exists() && self.database_dir.exists() && self.config_path.exists()
    }

    pub fn partitions_path(&self) -> PathBuf {
        self.database_dir.join("partitions.redb")
    }

    /// Watched roots with `~` expanded; roots that exist are canonicalized so
    /// they agree with the paths reported by file-system events.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        self.settings
            .indexing
            .watch_dirs
            .iter()
            .map(|dir| {
                let expanded = expand_home(dir);
                std::fs::canonicalize(&expanded).unwrap_or(expanded)
            })
            .collect()
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rag: RagSettings,
    pub indexing: IndexingSettings,
    pub privacy: PrivacySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_results: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            embedding_model: "hashing-384".to_string(),
            chunk_size: 1000,
            chunk_overlap: 200,
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingSettings {
    pub watch_dirs: Vec<String>,
    /// Glob patterns matched against every path segment
    pub exclude_dirs: Vec<String>,
    /// Extension allow-list for directory walks (e.g. ".md")
    pub file_types: Vec<String>,
    pub debounce_secs: f64,
    pub respect_gitignore: bool,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            watch_dirs: vec!["~/Documents".to_string(), "~/Desktop".to_string()],
            exclude_dirs: [".git", "node_modules", "__pycache__", ".venv", "*.tmp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            file_types: [".txt", ".md", ".py", ".js", ".yaml", ".yml", ".json"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            debounce_secs: 2.0,
            respect_gitignore: true,
        }
    }
}

impl IndexingSettings {
    /// Whether `path` carries an extension from the allow-list
    pub fn allows_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_lowercase();
        self.file_types
            .iter()
            .any(|allowed| normalize_extension(allowed) == ext)
    }
}

/// Lowercase an extension and strip its leading dot
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// What to do with a search hit whose stored metadata carries no tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingTierPolicy {
    #[default]
    Include,
    Exclude,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacySettings {
    pub rules: PrivacyRules,
    pub work_terms: Vec<String>,
    pub missing_tier_policy: MissingTierPolicy,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            rules: PrivacyRules::default(),
            work_terms: ["work", "job", "project", "code"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            missing_tier_policy: MissingTierPolicy::Include,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyRules {
    /// Path globs, evaluated in file order; first match wins
    #[serde(with = "ordered_rules")]
    pub paths: Vec<(String, PrivacyTier)>,
    #[serde(with = "ordered_rules")]
    pub extensions: Vec<(String, PrivacyTier)>,
}

impl Default for PrivacyRules {
    fn default() -> Self {
        Self {
            paths: vec![
                ("*/secrets/*".to_string(), PrivacyTier::Private),
                ("*/work/*".to_string(), PrivacyTier::Work),
                ("*/public/*".to_string(), PrivacyTier::Public),
            ],
            extensions: vec![
                (".txt".to_string(), PrivacyTier::Personal),
                (".md".to_string(), PrivacyTier::Personal),
                (".py".to_string(), PrivacyTier::Work),
                (".js".to_string(), PrivacyTier::Work),
            ],
        }
    }
}

impl Settings {
    /// Parse and validate YAML settings
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Malformed settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::Config(format!("Failed to serialize settings: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        let rag = &self.rag;
        if rag.chunk_size == 0 {
            return Err(Error::Config("rag.chunk_size must be greater than 0".to_string()));
        }
        if rag.chunk_overlap >= rag.chunk_size {
            return Err(Error::Config(format!(
                "rag.chunk_overlap ({}) must be smaller than rag.chunk_size ({})",
                rag.chunk_overlap, rag.chunk_size
            )));
        }
        if rag.max_results == 0 {
            return Err(Error::Config("rag.max_results must be greater than 0".to_string()));
        }
        if rag.embedding_model.trim().is_empty() {
            return Err(Error::Config("rag.embedding_model must not be empty".to_string()));
        }
        if std::time::Duration::try_from_secs_f64(self.indexing.debounce_secs).is_err() {
            return Err(Error::Config(format!(
                "indexing.debounce_secs must be a non-negative number of seconds, got {}",
                self.indexing.debounce_secs
            )));
        }

        let patterns = self
            .indexing
            .exclude_dirs
            .iter()
            .chain(self.privacy.rules.paths.iter().map(|(p, _)| p));
        for pattern in patterns {
            globset::Glob::new(pattern)
                .map_err(|e| Error::Config(format!("Invalid glob '{}': {}", pattern, e)))?;
        }
        Ok(())
    }
}

/// Serde adapter keeping YAML mapping order for rule tables.
mod ordered_rules {
    use crate::core::tier::PrivacyTier;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(
        rules: &[(String, PrivacyTier)],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(rules.len()))?;
        for (pattern, tier) in rules {
            map.serialize_entry(pattern, tier)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<(String, PrivacyTier)>, D::Error> {
        struct RulesVisitor;

        impl<'de> Visitor<'de> for RulesVisitor {
            type Value = Vec<(String, PrivacyTier)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of pattern to privacy tier")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut rules = Vec::new();
                while let Some(entry) = access.next_entry::<String, PrivacyTier>()? {
                    rules.push(entry);
                }
                Ok(rules)
            }
        }

        deserializer.deserialize_map(RulesVisitor)
    }
}
