//! TOML configuration with environment overrides.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8888
//!
//! [translator]
//! endpoint = "http://localhost:3000/translate"
//! timeout_secs = 30
//!
//! [editor]
//! hover_color = "#58a6ff"
//! selected_color = "#f0883e"
//!
//! [log]
//! filter = "site_preview=info"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compiler::CompileOptions;
use crate::error::Result;

pub const ENV_TRANSLATOR_URL: &str = "SITE_PREVIEW_TRANSLATOR_URL";
pub const ENV_PORT: &str = "SITE_PREVIEW_PORT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted `POST /session` body.
    pub max_body_bytes: usize,
    /// Unclaimed sessions older than this are pruned.
    pub session_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8888,
            max_body_bytes: 8 * 1024 * 1024,
            session_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        TranslatorConfig {
            endpoint: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "site_preview=info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub server: ServerConfig,
    pub translator: TranslatorConfig,
    pub editor: CompileOptions,
    pub log: LogConfig,
}

impl EditorConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_toml(&std::fs::read_to_string(p)?),
            None => Ok(Self::default()),
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Unparseable values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_TRANSLATOR_URL).filter(|u| !u.trim().is_empty()) {
            self.translator.endpoint = Some(url);
        }
        if let Some(port) = lookup(ENV_PORT).and_then(|p| p.trim().parse().ok()) {
            self.server.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = EditorConfig::default();
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 8888);
        assert_eq!(cfg.translator.endpoint, None);
        assert_eq!(cfg.translator.timeout_secs, 30);
        assert_eq!(cfg.log.filter, "site_preview=info");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = EditorConfig::from_toml("[server]\nport = 9000\n").unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.editor, CompileOptions::default());
    }

    #[test]
    fn test_full_toml() {
        let raw = r##"
[server]
host = "0.0.0.0"
port = 7000

[translator]
endpoint = "http://localhost:3000/translate"
timeout_secs = 5

[editor]
hover_color = "#00ff00"

[log]
filter = "site_preview=debug"
"##;
        let cfg = EditorConfig::from_toml(raw).unwrap();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.translator.endpoint.as_deref(), Some("http://localhost:3000/translate"));
        assert_eq!(cfg.translator.timeout_secs, 5);
        assert_eq!(cfg.editor.hover_color, "#00ff00");
        assert_eq!(cfg.editor.selected_color, CompileOptions::default().selected_color);
        assert_eq!(cfg.log.filter, "site_preview=debug");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = EditorConfig::from_toml("[server\nport=").unwrap_err();
        assert!(matches!(err, crate::error::EditorError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[translator]\nendpoint = \"http://x/t\"").unwrap();
        let cfg = EditorConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.translator.endpoint.as_deref(), Some("http://x/t"));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EditorConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, crate::error::EditorError::Io(_)));
    }

    #[test]
    fn test_load_without_path_is_default() {
        assert_eq!(EditorConfig::load(None).unwrap(), EditorConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = EditorConfig::default();
        cfg.apply_env_with(|key| match key {
            ENV_TRANSLATOR_URL => Some("http://env/t".to_string()),
            ENV_PORT => Some("9123".to_string()),
            _ => None,
        });
        assert_eq!(cfg.translator.endpoint.as_deref(), Some("http://env/t"));
        assert_eq!(cfg.server.port, 9123);
    }

    #[test]
    fn test_bad_env_port_is_ignored() {
        let mut cfg = EditorConfig::default();
        cfg.apply_env_with(|key| (key == ENV_PORT).then(|| "not-a-port".to_string()));
        assert_eq!(cfg.server.port, 8888);
    }
}
