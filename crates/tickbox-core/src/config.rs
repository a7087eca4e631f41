use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Branch that holds ticket directories unless configured otherwise.
pub const DEFAULT_BRANCH: &str = "ticgit";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub author: AuthorConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            author: AuthorConfig::default(),
        }
    }
}

/// Identity overrides; unset fields fall through to the store's `user.*`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AuthorConfig {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub author: AuthorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub project: ProjectConfig,
    pub user: UserConfig,
    pub branch: String,
    pub author: AuthorConfig,
}

pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_root.join(".tickbox/config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("tickbox/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn resolve_config(project_root: &Path) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;

    let branch = resolve_branch(&project.branch, env::var("TICKBOX_BRANCH").ok());
    let author = merge_author(&project.author, &user.author);

    Ok(EffectiveConfig {
        project,
        user,
        branch,
        author,
    })
}

fn resolve_branch(project_branch: &str, env_branch: Option<String>) -> String {
    env_branch
        .map(|raw| raw.trim().to_string())
        .filter(|branch| !branch.is_empty())
        .unwrap_or_else(|| project_branch.to_string())
}

/// Project settings win over user settings, field by field.
fn merge_author(project: &AuthorConfig, user: &AuthorConfig) -> AuthorConfig {
    AuthorConfig {
        email: project.email.clone().or_else(|| user.email.clone()),
        name: project.name.clone().or_else(|| user.name.clone()),
    }
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}
