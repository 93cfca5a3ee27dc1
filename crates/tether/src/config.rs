//! Runtime configuration.
//!
//! ```toml
//! name = "scripts"
//! global_alias = "global"
//! thread_mode = "per_runtime"
//! report_leaks = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a runtime binds to threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadMode {
    /// Each runtime is owned by the thread that created it and may be handed
    /// off through its locker.
    #[default]
    PerRuntime,
    /// The first runtime created binds a process-wide thread. Every later
    /// runtime must be created on that thread and never leaves it.
    ProcessWide,
}

/// Runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Diagnostic label used in logs and worker thread names
    #[serde(default = "default_name")]
    pub name: String,
    /// Extra name under which script can reach the global object
    #[serde(default)]
    pub global_alias: Option<String>,
    #[serde(default)]
    pub thread_mode: ThreadMode,
    /// Refuse to release a runtime that still has live handles
    #[serde(default = "default_report_leaks")]
    pub report_leaks: bool,
}

fn default_name() -> String {
    "runtime".to_string()
}

fn default_report_leaks() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            global_alias: None,
            thread_mode: ThreadMode::default(),
            report_leaks: default_report_leaks(),
        }
    }
}

impl RuntimeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_global_alias(mut self, alias: impl Into<String>) -> Self {
        self.global_alias = Some(alias.into());
        self
    }

    pub fn with_thread_mode(mut self, mode: ThreadMode) -> Self {
        self.thread_mode = mode;
        self
    }

    pub fn with_leak_reports(mut self, report: bool) -> Self {
        self.report_leaks = report;
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("name must not be empty".to_string()));
        }
        if let Some(alias) = &self.global_alias {
            let mut chars = alias.chars();
            let valid_start = chars
                .next()
                .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$');
            if !valid_start || !chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
                return Err(Error::Config(format!("global_alias '{}' is not an identifier", alias)));
            }
        }
        Ok(())
    }
}
