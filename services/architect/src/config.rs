//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The fallback Gemini API key comes from GEMINI_API_KEY, API_KEY or
//! api_key_file, never from the TOML directly.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Environment variables checked for the fallback key, in order
const KEY_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Completion service settings
#[derive(Debug, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Path to a file holding the fallback key (alternative to GEMINI_API_KEY)
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
    #[serde(skip)]
    pub api_key: Option<Secret<String>>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            api_key_file: None,
            api_key: None,
        }
    }
}

/// Local persistence settings
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_base_url() -> String {
    completion::gemini::DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_max_connections() -> usize {
    256
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("algodao-architect.json")
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Fallback key resolution order:
    /// 1. GEMINI_API_KEY env var
    /// 2. API_KEY env var
    /// 3. api_key_file path from config
    ///
    /// Blank values are skipped.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.gemini.base_url.starts_with("http://")
            && !config.gemini.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.gemini.base_url
            )));
        }

        if config.gemini.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        config.gemini.api_key = resolve_api_key(config.gemini.api_key_file.as_deref())?;
        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("algodao-architect.toml")
    }
}

fn resolve_api_key(key_file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    let from_env = KEY_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|key| !key.trim().is_empty());
    if let Some(key) = from_env {
        return Ok(Some(Secret::new(key)));
    }

    let Some(key_file) = key_file else {
        return Ok(None);
    };
    let key = std::fs::read_to_string(key_file).map_err(|e| {
        common::Error::Config(format!(
            "failed to read api_key_file {}: {e}",
            key_file.display()
        ))
    })?;
    let key = key.trim().to_owned();
    Ok((!key.is_empty()).then(|| Secret::new(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    /// SAFETY: Callers must hold ENV_MUTEX.
    unsafe fn clear_key_env() {
        for var in KEY_ENV_VARS {
            unsafe { remove_env(var) };
        }
    }

    fn minimal_toml() -> &'static str {
        r#"
[server]
listen_addr = "127.0.0.1:8080"
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, minimal_toml());
        unsafe { clear_key_env() };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.server.max_connections, 256);
        assert_eq!(config.gemini.base_url, completion::gemini::DEFAULT_BASE_URL);
        assert_eq!(config.gemini.timeout_secs, 120);
        assert_eq!(config.storage.path, PathBuf::from("algodao-architect.json"));
        assert!(config.gemini.api_key.is_none());
    }

    #[test]
    fn full_config_overrides_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "0.0.0.0:9000"
max_connections = 16

[gemini]
base_url = "http://127.0.0.1:4000"
timeout_secs = 30

[storage]
path = "/var/lib/architect/store.json"
"#,
        );
        unsafe { clear_key_env() };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.max_connections, 16);
        assert_eq!(config.gemini.base_url, "http://127.0.0.1:4000");
        assert_eq!(config.gemini.timeout_secs, 30);
        assert_eq!(
            config.storage.path,
            PathBuf::from("/var/lib/architect/store.json")
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn gemini_env_key_wins_over_api_key() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, minimal_toml());

        unsafe {
            set_env("GEMINI_API_KEY", "AIza-gemini");
            set_env("API_KEY", "AIza-generic");
        }
        let config = Config::load(&path).unwrap();
        assert_eq!(config.gemini.api_key.as_ref().unwrap().expose(), "AIza-gemini");
        unsafe { clear_key_env() };
    }

    #[test]
    fn api_key_env_used_when_gemini_blank() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, minimal_toml());

        unsafe {
            set_env("GEMINI_API_KEY", "  ");
            set_env("API_KEY", "AIza-generic");
        }
        let config = Config::load(&path).unwrap();
        assert_eq!(config.gemini.api_key.as_ref().unwrap().expose(), "AIza-generic");
        unsafe { clear_key_env() };
    }

    #[test]
    fn key_from_file_is_trimmed() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("api_key");
        std::fs::write(&key_path, "AIza-file\n").unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"
[server]
listen_addr = "127.0.0.1:8080"

[gemini]
api_key_file = "{}"
"#,
                key_path.display()
            ),
        );

        unsafe { clear_key_env() };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.gemini.api_key.as_ref().unwrap().expose(), "AIza-file");
    }

    #[test]
    fn env_key_overrides_missing_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[gemini]
api_key_file = "/nonexistent/path/api_key"
"#,
        );

        unsafe { set_env("GEMINI_API_KEY", "AIza-env") };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.gemini.api_key.as_ref().unwrap().expose(), "AIza-env");
        unsafe { clear_key_env() };
    }

    #[test]
    fn missing_key_file_is_an_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[gemini]
api_key_file = "/nonexistent/path/api_key"
"#,
        );

        unsafe { clear_key_env() };
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("api_key_file"), "got: {err}");
    }

    #[test]
    fn blank_key_file_yields_none() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("api_key");
        std::fs::write(&key_path, "  \n  ").unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"
[server]
listen_addr = "127.0.0.1:8080"

[gemini]
api_key_file = "{}"
"#,
                key_path.display()
            ),
        );

        unsafe { clear_key_env() };
        let config = Config::load(&path).unwrap();
        assert!(config.gemini.api_key.is_none());
    }

    #[test]
    fn base_url_without_scheme_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[gemini]
base_url = "generativelanguage.googleapis.com"
"#,
        );
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("base_url must start with http"), "got: {err}");
    }

    #[test]
    fn zero_timeout_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[gemini]
timeout_secs = 0
"#,
        );
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn zero_max_connections_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "127.0.0.1:8080"
max_connections = 0
"#,
        );
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("algodao-architect.toml"));
    }

    #[test]
    fn resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }
}
