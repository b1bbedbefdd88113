use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::feed::DEFAULT_FETCH_LIMIT;
use crate::pagination::DEFAULT_PAGE_SIZE;
use crate::session::{Identity, Session};
use crate::social::DEFAULT_BASE_URL;

const DEFAULT_ENV_PREFIX: &str = "SOCIAL_FEED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("social-feed/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            fetch_limit: default_fetch_limit(),
        }
    }
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_fetch_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub access_token: String,
}

impl AuthConfig {
    /// The stored session, when both a name and a token are present.
    pub fn session(&self) -> Option<Session> {
        if self.name.trim().is_empty() || self.access_token.trim().is_empty() {
            return None;
        }
        Some(Session {
            name: self.name.trim().to_string(),
            email: self.email.clone(),
            access_token: self.access_token.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "warn".into()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix));

    tracing::debug!(base_url = %cfg.api.base_url, page_size = cfg.feed.page_size, "config loaded");
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Overlays the fields of `other` that differ from their defaults.
fn merge_config(mut base: Config, other: Config) -> Config {
    let defaults = Config::default();

    if !other.api.base_url.is_empty() && other.api.base_url != defaults.api.base_url {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.api_key.is_empty() {
        base.api.api_key = other.api.api_key;
    }
    if !other.api.user_agent.is_empty() && other.api.user_agent != defaults.api.user_agent {
        base.api.user_agent = other.api.user_agent;
    }
    if other.api.timeout != defaults.api.timeout {
        base.api.timeout = other.api.timeout;
    }

    if other.feed.page_size != 0 && other.feed.page_size != defaults.feed.page_size {
        base.feed.page_size = other.feed.page_size;
    }
    if other.feed.fetch_limit != 0 && other.feed.fetch_limit != defaults.feed.fetch_limit {
        base.feed.fetch_limit = other.feed.fetch_limit;
    }

    if !other.auth.name.is_empty() {
        base.auth.name = other.auth.name;
    }
    if !other.auth.email.is_empty() {
        base.auth.email = other.auth.email;
    }
    if !other.auth.access_token.is_empty() {
        base.auth.access_token = other.auth.access_token;
    }

    if !other.log.filter.is_empty() && other.log.filter != defaults.log.filter {
        base.log.filter = other.log.filter;
    }

    base
}

fn load_env(prefix: &str) -> Config {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    let mut cfg = Config::default();
    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }
    cfg
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.api_key" => cfg.api.api_key = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.timeout" => match humantime::parse_duration(&value) {
            Ok(duration) => cfg.api.timeout = duration,
            Err(err) => tracing::warn!(key, error = %err, "ignoring invalid duration"),
        },
        "feed.page_size" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.feed.page_size = parsed;
            }
        }
        "feed.fetch_limit" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.feed.fetch_limit = parsed;
            }
        }
        "auth.name" => cfg.auth.name = value,
        "auth.email" => cfg.auth.email = value,
        "auth.access_token" => cfg.auth.access_token = value,
        "log.filter" => cfg.log.filter = value,
        _ => {}
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("social-feed").join("config.yaml"))
}

/// Writes the identity's session into the `auth` section, keeping every
/// other setting. A signed-out identity clears the section.
pub fn save_identity(path: Option<PathBuf>, identity: &Identity) -> Result<PathBuf> {
    let auth = match identity.session() {
        Some(session) => {
            anyhow::ensure!(
                !session.name.trim().is_empty(),
                "config: auth.name is required"
            );
            anyhow::ensure!(
                !session.access_token.trim().is_empty(),
                "config: auth.access_token is required"
            );
            AuthConfig {
                name: session.name,
                email: session.email,
                access_token: session.access_token,
            }
        }
        None => AuthConfig::default(),
    };

    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };

    cfg.auth = auth;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    fn isolated() -> LoadOptions {
        LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/social-feed.yaml")),
            env_prefix: Some("SOCIAL_FEED_TEST_NONE".into()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(isolated()).unwrap();
        assert_eq!(cfg.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.feed.page_size, 10);
        assert_eq!(cfg.feed.fetch_limit, 100);
        assert_eq!(cfg.log.filter, "warn");
        assert!(cfg.auth.session().is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  api_key: abc\n  timeout: 5s\nfeed:\n  page_size: 4\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("SOCIAL_FEED_TEST_NONE".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.api_key, "abc");
        assert_eq!(cfg.api.timeout, Duration::from_secs(5));
        assert_eq!(cfg.feed.page_size, 4);
        assert_eq!(cfg.feed.fetch_limit, 100);
    }

    #[test]
    fn save_identity_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let session = Session {
            name: "ada".into(),
            email: "ada@stud.noroff.no".into(),
            access_token: "tok".into(),
        };
        let identity = Identity::anonymous();
        identity.sign_in(session.clone());
        save_identity(Some(path.clone()), &identity).unwrap();
        let saved = read_config_file(&path).unwrap();
        assert_eq!(saved.auth.session(), Some(session));
        assert_eq!(saved.feed.page_size, 10);
    }

    #[test]
    fn signed_out_identity_clears_auth_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  api_key: abc\nauth:\n  name: ada\n  access_token: tok\n",
        )
        .unwrap();
        let identity = Identity::anonymous();
        save_identity(Some(path.clone()), &identity).unwrap();
        let saved = read_config_file(&path).unwrap();
        assert_eq!(saved.auth, AuthConfig::default());
        assert_eq!(saved.api.api_key, "abc");
    }

    #[test]
    fn env_overrides() {
        env::set_var("SOCIAL_FEED_TEST_ENV_FEED__PAGE_SIZE", "3");
        env::set_var("SOCIAL_FEED_TEST_ENV_API__TIMEOUT", "2s");
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/social-feed.yaml")),
            env_prefix: Some("SOCIAL_FEED_TEST_ENV".into()),
        })
        .unwrap();
        assert_eq!(cfg.feed.page_size, 3);
        assert_eq!(cfg.api.timeout, Duration::from_secs(2));
        env::remove_var("SOCIAL_FEED_TEST_ENV_FEED__PAGE_SIZE");
        env::remove_var("SOCIAL_FEED_TEST_ENV_API__TIMEOUT");
    }
}
