//! The setup file: which repositories to visit and how the built-in rules
//! are tuned.
//!
//! ```toml
//! [[repos]]
//! repo = "octo/bot"
//!
//! [[repos]]
//! repo = "octo/docs"
//! filter = { state = "open", labels = ["docs"] }
//!
//! [rules]
//! triage_label = "needs-triage"
//! automerge_label = "automerge"
//! project = 12
//! project_column = "To do"
//! ```

use std::path::Path;

use config::{Config as ConfigBuilder, ConfigError, File, FileFormat};
use idembot::{MergeMethod, RepoTarget};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SetupFile {
    pub repos: Vec<RepoTarget>,
    pub rules: RuleSettings,
}

/// Knobs for the built-in rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    /// Label put on open issues that have none.
    pub triage_label: String,
    /// Label that opts a pull request into merging once checks pass.
    pub automerge_label: String,
    pub merge_method: MergeMethod,
    /// Project board open items are filed on. The board rule is only
    /// registered when this is set.
    pub project: Option<u64>,
    /// Column open items land in.
    pub project_column: String,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            triage_label: "needs-triage".to_string(),
            automerge_label: "automerge".to_string(),
            merge_method: MergeMethod::default(),
            project: None,
            project_column: "To do".to_string(),
        }
    }
}

impl SetupFile {
    /// Read a setup file. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            tracing::debug!("No setup file at {}", path.display());
            return Ok(None);
        }
        let setup = ConfigBuilder::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(Some(setup))
    }

    pub fn parse(toml_content: &str) -> Result<Self, ConfigError> {
        ConfigBuilder::builder()
            .add_source(File::from_str(toml_content, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
