// Harness configuration: backend choice, timeout policy and the language table
use anyhow::{bail, Context, Result};
use codepad_common::types::Language;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};

/// Wall-clock limit per run, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

pub const DEFAULT_CONFIG_PATH: &str = "config/harness.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Docker,
    Local,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Backend::Docker),
            "local" => Ok(Backend::Local),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageExecution {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: Language,
    pub version: String,
    /// Script name inside the environment, overwritten on every run
    pub file_name: String,
    pub execution: LanguageExecution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerConfig {
    pub image: String,
    pub workdir: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    /// Detach the container from the network once setup has finished
    pub network_disabled: bool,
    /// Commands run once after boot, e.g. installing interpreters
    #[serde(default)]
    pub setup: Vec<Vec<String>>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: "node:22-bookworm-slim".to_string(),
            workdir: "/workspace".to_string(),
            memory_limit_mb: 512,
            cpu_limit: 1.0,
            network_disabled: true,
            setup: vec![
                vec!["apt-get".to_string(), "update".to_string()],
                vec![
                    "apt-get".to_string(),
                    "install".to_string(),
                    "-y".to_string(),
                    "--no-install-recommends".to_string(),
                    "python3".to_string(),
                ],
            ],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Parent of the per-boot working directories, system temp dir when unset
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub setup: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub backend: Backend,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default = "default_languages")]
    pub languages: Vec<LanguageConfig>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn language(name: Language, version: &str, file_name: &str, command: &str, args: &[&str]) -> LanguageConfig {
    LanguageConfig {
        name,
        version: version.to_string(),
        file_name: file_name.to_string(),
        execution: LanguageExecution {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        },
    }
}

fn default_languages() -> Vec<LanguageConfig> {
    vec![
        language(Language::Python, "3", "script.py", "python3", &["-u", "script.py"]),
        language(Language::JavaScript, "22", "script.js", "node", &["script.js"]),
        language(
            Language::TypeScript,
            "22",
            "script.ts",
            "node",
            &["--experimental-strip-types", "--no-warnings", "script.ts"],
        ),
    ]
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Docker,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            docker: DockerConfig::default(),
            local: LocalConfig::default(),
            languages: default_languages(),
        }
    }
}

impl HarnessConfig {
    /// Defaults for running against host interpreters
    pub fn local() -> Self {
        Self {
            backend: Backend::Local,
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Harness config file not found: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: HarnessConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load `CODEPAD_CONFIG` or `config/harness.json`, then apply env overrides.
    ///
    /// An explicitly named file must exist; a missing default file falls back to
    /// built-in defaults.
    pub fn load_default() -> Result<Self> {
        let mut config = match std::env::var("CODEPAD_CONFIG") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::load(default_path)?
                } else {
                    tracing::info!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
                    Self::default()
                }
            }
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// `CODEPAD_BACKEND` and `CODEPAD_TIMEOUT_MS`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("CODEPAD_BACKEND") {
            self.backend = backend.parse().map_err(anyhow::Error::msg)?;
        }
        if let Ok(timeout) = std::env::var("CODEPAD_TIMEOUT_MS") {
            self.timeout_ms = timeout
                .parse()
                .with_context(|| format!("Invalid CODEPAD_TIMEOUT_MS: {}", timeout))?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }

        let mut seen = std::collections::HashSet::new();
        for lang in &self.languages {
            if !seen.insert(lang.name) {
                bail!("Language '{}' is configured twice", lang.name);
            }
            if !crate::environment::is_plain_file_name(&lang.file_name) {
                bail!("Invalid script file name for {}: {}", lang.name, lang.file_name);
            }
            if lang.execution.command.is_empty() {
                bail!("Empty execution command for {}", lang.name);
            }
        }

        for cmd in self.setup_commands() {
            if cmd.is_empty() {
                bail!("Setup commands must not be empty");
            }
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Setup commands of the selected backend
    pub fn setup_commands(&self) -> &[Vec<String>] {
        match self.backend {
            Backend::Docker => &self.docker.setup,
            Backend::Local => &self.local.setup,
        }
    }

    pub fn language(&self, language: &Language) -> HarnessResult<&LanguageConfig> {
        self.languages
            .iter()
            .find(|l| l.name == *language)
            .ok_or_else(|| HarnessError::UnsupportedLanguage(language.to_string()))
    }

    pub fn list_languages(&self) -> Vec<Language> {
        self.languages.iter().map(|l| l.name).collect()
    }
}
