//! Configuration Management
//!
//! Handles persistent configuration storage for gcpgraph.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::gcp::auth::{get_default_project, validate_project_id};
use crate::graph::neo4j::GraphConfig;

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Projects synced when none are given on the command line
    #[serde(default)]
    pub projects: Vec<String>,
    /// Resource types synced when none are given on the command line
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub neo4j: GraphConfig,
    #[serde(default)]
    pub cleanup_batch_size: Option<i64>,
    /// Projects synced at the same time
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gcpgraph").join("config.json"))
    }

    /// Load configuration from disk
    ///
    /// A missing file yields the defaults; an unreadable one is logged and ignored.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config file: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get effective projects (CLI > config > gcloud default)
    ///
    /// Invalid project IDs are dropped with a warning.
    pub fn effective_projects(&self, cli: &[String]) -> Vec<String> {
        let candidates = if !cli.is_empty() {
            cli.to_vec()
        } else if !self.projects.is_empty() {
            self.projects.clone()
        } else {
            get_default_project().into_iter().collect()
        };

        let mut projects: Vec<String> = Vec::new();
        for project in candidates {
            if !validate_project_id(&project) {
                tracing::warn!("Skipping invalid project ID '{}'", project);
            } else if !projects.contains(&project) {
                projects.push(project);
            }
        }
        projects
    }

    /// Get effective resource keys (CLI > config); empty means all
    pub fn effective_resources(&self, cli: &[String]) -> Vec<String> {
        if cli.is_empty() {
            self.resources.clone()
        } else {
            cli.to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_projects_win_over_file() {
        let config = Config {
            projects: vec!["file-project".into()],
            ..Default::default()
        };
        assert_eq!(
            config.effective_projects(&["cli-project".into()]),
            vec!["cli-project"]
        );
        assert_eq!(config.effective_projects(&[]), vec!["file-project"]);
    }

    #[test]
    fn test_invalid_and_duplicate_projects_dropped() {
        let config = Config::default();
        let cli = vec![
            "good-project".to_string(),
            "Bad_Project".to_string(),
            "good-project".to_string(),
        ];
        assert_eq!(config.effective_projects(&cli), vec!["good-project"]);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"projects": ["alpha-project"]}"#).unwrap();
        assert_eq!(config.neo4j.uri, "bolt://localhost:7687");
        assert_eq!(config.neo4j.database, "neo4j");
        assert!(config.cleanup_batch_size.is_none());
        assert!(config.effective_resources(&[]).is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("gcpgraph-test-{}", std::process::id()))
            .join("config.json");
        let config = Config {
            projects: vec!["alpha-project".into()],
            cleanup_batch_size: Some(50),
            ..Default::default()
        };

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.projects, config.projects);
        assert_eq!(loaded.cleanup_batch_size, Some(50));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
