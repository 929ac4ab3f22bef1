//! Claude Code settings discovery and merging.
//!
//! Settings are read from four sources, in order:
//! 1. User settings (`$CLAUDE_CONFIG_DIR/settings.json` or `~/.claude/settings.json`)
//! 2. Project settings (`<cwd>/.claude/settings.json`)
//! 3. Local project settings (`<cwd>/.claude/settings.local.json`)
//! 4. Enterprise managed settings (platform-specific path)
//!
//! Rule lists from every source stay active (they are concatenated). Scalars
//! take the value of the last source that sets them and `env` maps are merged
//! key by key. A missing or malformed file counts as empty settings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::permissions::{PermissionCheck, check_permission};

/// Reads an explicit `null` as the empty value.
fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The `permissions` section of a settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSettings {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub allow: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub deny: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ask: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub additional_directories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<String>,
}

/// One settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaudeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionSettings>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ClaudeSettings {
    pub fn default_mode(&self) -> Option<&str> {
        self.permissions.as_ref()?.default_mode.as_deref()
    }
}

/// Where a settings file comes from, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SettingsSource {
    User,
    Project,
    Local,
    Managed,
}

impl SettingsSource {
    /// Path of this source's file for a session rooted at `cwd`.
    pub fn path(self, cwd: &Path) -> PathBuf {
        match self {
            Self::User => claude_config_dir().join("settings.json"),
            Self::Project => cwd.join(".claude").join("settings.json"),
            Self::Local => cwd.join(".claude").join("settings.local.json"),
            Self::Managed => managed_settings_path(),
        }
    }
}

/// The Claude configuration directory, honouring `CLAUDE_CONFIG_DIR`.
pub fn claude_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CLAUDE_CONFIG_DIR")
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/"))
        .join(".claude")
}

/// Platform-specific location of the enterprise managed settings file.
pub fn managed_settings_path() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/Library/Application Support/ClaudeCode/managed-settings.json")
    }
    #[cfg(target_os = "windows")]
    {
        PathBuf::from(r"C:\Program Files\ClaudeCode\managed-settings.json")
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        PathBuf::from("/etc/claude-code/managed-settings.json")
    }
}

/// Read and decode one settings file.
pub fn load_settings_file(path: &Path) -> Result<ClaudeSettings> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read settings file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse settings file {}: {}", path.display(), e))
    })
}

/// Like [`load_settings_file`], degrading to empty settings.
fn load_or_default(path: &Path) -> ClaudeSettings {
    if !path.exists() {
        debug!(path = %path.display(), "Settings file not present");
        return ClaudeSettings::default();
    }
    load_settings_file(path).unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring unreadable settings file");
        ClaudeSettings::default()
    })
}

/// Load the managed settings file when one is installed.
pub fn load_managed_settings() -> Option<ClaudeSettings> {
    let path = managed_settings_path();
    path.exists().then(|| load_or_default(&path))
}

/// Merge settings given in precedence order (lowest first).
pub fn merge_settings<'a>(sources: impl IntoIterator<Item = &'a ClaudeSettings>) -> ClaudeSettings {
    let mut permissions = PermissionSettings::default();
    let mut merged = ClaudeSettings::default();

    for settings in sources {
        if let Some(p) = &settings.permissions {
            permissions.allow.extend(p.allow.iter().cloned());
            permissions.deny.extend(p.deny.iter().cloned());
            permissions.ask.extend(p.ask.iter().cloned());
            permissions
                .additional_directories
                .extend(p.additional_directories.iter().cloned());
            if let Some(mode) = p.default_mode.as_ref().filter(|m| !m.is_empty()) {
                permissions.default_mode = Some(mode.clone());
            }
        }
        merged
            .env
            .extend(settings.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(model) = settings.model.as_ref().filter(|m| !m.is_empty()) {
            merged.model = Some(model.clone());
        }
    }

    merged.permissions = Some(permissions);
    merged
}

/// Paths of the four settings files used by a [`SettingsManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsPaths {
    pub user: PathBuf,
    pub project: PathBuf,
    pub local: PathBuf,
    pub managed: PathBuf,
}

impl SettingsPaths {
    /// Standard locations for a session rooted at `cwd`.
    pub fn for_cwd(cwd: &Path) -> Self {
        Self {
            user: SettingsSource::User.path(cwd),
            project: SettingsSource::Project.path(cwd),
            local: SettingsSource::Local.path(cwd),
            managed: SettingsSource::Managed.path(cwd),
        }
    }

    fn in_order(&self) -> [&Path; 4] {
        [&self.user, &self.project, &self.local, &self.managed]
    }
}

/// Merged settings for one session, reloadable at runtime.
#[derive(Debug)]
pub struct SettingsManager {
    cwd: PathBuf,
    paths: SettingsPaths,
    merged: RwLock<ClaudeSettings>,
}

impl SettingsManager {
    /// Load the standard settings files for `cwd`.
    pub fn load(cwd: impl Into<PathBuf>) -> Self {
        let cwd = cwd.into();
        let paths = SettingsPaths::for_cwd(&cwd);
        Self::load_from(cwd, paths)
    }

    /// Load settings from explicit paths.
    pub fn load_from(cwd: impl Into<PathBuf>, paths: SettingsPaths) -> Self {
        let manager = Self {
            cwd: cwd.into(),
            paths,
            merged: RwLock::new(ClaudeSettings::default()),
        };
        manager.reload();
        manager
    }

    /// Re-read every source and replace the merged snapshot.
    pub fn reload(&self) {
        let loaded: Vec<ClaudeSettings> = self
            .paths
            .in_order()
            .into_iter()
            .map(load_or_default)
            .collect();
        let merged = merge_settings(&loaded);
        debug!(
            cwd = %self.cwd.display(),
            allow = merged.permissions.as_ref().map_or(0, |p| p.allow.len()),
            deny = merged.permissions.as_ref().map_or(0, |p| p.deny.len()),
            "Settings loaded"
        );
        *self.merged.write().unwrap_or_else(PoisonError::into_inner) = merged;
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Snapshot of the merged settings.
    pub fn settings(&self) -> ClaudeSettings {
        self.merged
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check a tool invocation against the merged rules.
    pub fn check_permission(&self, tool_name: &str, input: &Value) -> PermissionCheck {
        let guard = self.merged.read().unwrap_or_else(PoisonError::into_inner);
        let permissions = guard.permissions.clone().unwrap_or_default();
        drop(guard);
        check_permission(&permissions, tool_name, input, &self.cwd)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::permissions::{ACP_BASH, ACP_READ, PermissionDecision};
    use serde_json::json;

    fn write(path: &Path, value: &Value) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_string(value).unwrap()).unwrap();
    }

    fn temp_paths(root: &Path) -> SettingsPaths {
        SettingsPaths {
            user: root.join("home/.claude/settings.json"),
            project: root.join("proj/.claude/settings.json"),
            local: root.join("proj/.claude/settings.local.json"),
            managed: root.join("etc/managed-settings.json"),
        }
    }

    #[test]
    fn merges_lists_and_overrides_scalars() {
        let user = ClaudeSettings {
            permissions: Some(PermissionSettings {
                allow: vec!["Read".into()],
                default_mode: Some("plan".into()),
                ..PermissionSettings::default()
            }),
            env: HashMap::from([("A".into(), "1".into()), ("B".into(), "1".into())]),
            model: Some("opus".into()),
        };
        let local = ClaudeSettings {
            permissions: Some(PermissionSettings {
                allow: vec!["Bash(ls:*)".into()],
                deny: vec!["Read(./.env)".into()],
                default_mode: Some("acceptEdits".into()),
                ..PermissionSettings::default()
            }),
            env: HashMap::from([("B".into(), "2".into())]),
            model: None,
        };
        let merged = merge_settings([&user, &ClaudeSettings::default(), &local]);
        let p = merged.permissions.as_ref().unwrap();
        assert_eq!(p.allow, vec!["Read".to_string(), "Bash(ls:*)".to_string()]);
        assert_eq!(p.deny, vec!["Read(./.env)".to_string()]);
        assert_eq!(merged.default_mode(), Some("acceptEdits"));
        assert_eq!(merged.model.as_deref(), Some("opus"));
        assert_eq!(merged.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(merged.env.get("B").map(String::as_str), Some("2"));
    }

    #[test]
    fn missing_and_malformed_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_paths(dir.path());
        std::fs::create_dir_all(paths.project.parent().unwrap()).unwrap();
        std::fs::write(&paths.project, "{ not json").unwrap();

        let manager = SettingsManager::load_from(dir.path().join("proj"), paths);
        let settings = manager.settings();
        assert_eq!(settings.permissions, Some(PermissionSettings::default()));
        assert!(settings.env.is_empty());
    }

    #[test]
    fn null_rule_lists_keep_the_rest_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        write(
            &path,
            &json!({"permissions": {"allow": null, "deny": ["Read(./.env)"], "ask": null}, "env": null}),
        );

        let settings = load_settings_file(&path).unwrap();
        let permissions = settings.permissions.unwrap();
        assert!(permissions.allow.is_empty());
        assert!(permissions.ask.is_empty());
        assert_eq!(permissions.deny, vec!["Read(./.env)".to_string()]);
        assert!(settings.env.is_empty());
    }

    #[test]
    fn load_settings_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "42").unwrap();
        assert!(matches!(load_settings_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn manager_checks_rules_from_every_source() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_paths(dir.path());
        write(&paths.user, &json!({"permissions": {"allow": ["Read"]}}));
        write(&paths.managed, &json!({"permissions": {"deny": ["Bash(rm -rf:*)"]}}));
        write(&paths.local, &json!({"permissions": {"deny": ["Read(./.env)"]}, "unknown": true}));

        let manager = SettingsManager::load_from(dir.path().join("proj"), paths);
        let denied = manager.check_permission(ACP_BASH, &json!({"command": "rm -rf /tmp/x"}));
        assert_eq!(denied.decision, PermissionDecision::Deny);
        let env = manager.check_permission(ACP_READ, &json!({"file_path": "./.env"}));
        assert_eq!(env.decision, PermissionDecision::Deny);
        let readme = manager.check_permission(ACP_READ, &json!({"file_path": "README.md"}));
        assert_eq!(readme.decision, PermissionDecision::Allow);
    }

    #[test]
    fn reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_paths(dir.path());
        let project = paths.project.clone();
        let manager = SettingsManager::load_from(dir.path().join("proj"), paths);
        assert_eq!(manager.settings().default_mode(), None);

        write(&project, &json!({"permissions": {"defaultMode": "dontAsk"}, "model": "sonnet"}));
        manager.reload();
        assert_eq!(manager.settings().default_mode(), Some("dontAsk"));
        assert_eq!(manager.settings().model.as_deref(), Some("sonnet"));
    }

    #[test]
    fn project_paths_live_under_cwd() {
        let paths = SettingsPaths::for_cwd(Path::new("/repo"));
        assert_eq!(paths.project, PathBuf::from("/repo/.claude/settings.json"));
        assert_eq!(paths.local, PathBuf::from("/repo/.claude/settings.local.json"));
        assert!(paths.user.ends_with("settings.json"));
    }
}
