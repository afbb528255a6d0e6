use anyhow::{Context, Result, anyhow};
use chatrelay_client::{BridgeConfig, ReconnectPolicy};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

// ── Gateway Config ──────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("auth_token", &mask_secret(&self.auth_token))
            .field("subscriber_buffer", &self.subscriber_buffer)
            .finish()
    }
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_subscriber_buffer() -> usize {
    64
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            port: default_gateway_port(),
            auth_token: String::new(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("Invalid gateway bind address '{}'", self.bind))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

// ── Bridge Config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSection {
    #[serde(default = "default_bridge_url")]
    pub url: String,
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:3100/bridge".to_string()
}

fn default_ack_timeout_secs() -> u64 {
    30
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            ack_timeout_secs: default_ack_timeout_secs(),
        }
    }
}

impl BridgeSection {
    pub fn client_config(&self) -> BridgeConfig {
        BridgeConfig {
            url: self.url.clone(),
            ack_timeout: Duration::from_secs(self.ack_timeout_secs),
        }
    }
}

// ── Reconnect Config ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_initial_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.initial_delay_ms)),
            multiplier: self.multiplier,
            max_attempts: self.max_attempts,
        }
    }
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for secrets longer than 7 chars, otherwise "***".
fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatrelay")
}

impl RelayConfig {
    /// Load config from `custom_path` or the default location, then apply
    /// environment overrides. A missing default file means defaults.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        let mut config = if custom_path.is_none() && !path.exists() {
            Self::default()
        } else {
            Self::from_file(&path)?
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse one config file, expanding allowlisted `${VAR}`s
    pub fn from_file(path: &Path) -> Result<Self> {
        // Refuse group- or world-readable files; they may hold the token
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `chatrelay init` first.",
                path.display()
            )
        })?;

        let expanded = expand_env_vars(&content, |name| std::env::var(name).ok());
        let config: Self = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        if !config.gateway.auth_token.is_empty() && !content.contains("${API_TOKEN}") {
            warn!(
                "Gateway token is hardcoded in config file. For security, use environment variables: auth_token = \"${{API_TOKEN}}\""
            );
        }

        Ok(config)
    }

    /// Apply `PORT`, `API_TOKEN` and `CHATRELAY_BRIDGE_URL` overrides
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup("PORT").filter(|v| !v.is_empty()) {
            self.gateway.port = port
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a port number, got '{}'", port))?;
        }
        if let Some(token) = lookup("API_TOKEN").filter(|v| !v.is_empty()) {
            self.gateway.auth_token = token;
        }
        if let Some(url) = lookup("CHATRELAY_BRIDGE_URL").filter(|v| !v.is_empty()) {
            self.bridge.url = url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.gateway.bind_addr()?;

        let url = url::Url::parse(&self.bridge.url)
            .with_context(|| format!("Invalid bridge url '{}'", self.bridge.url))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(anyhow!(
                "Bridge url must use ws:// or wss://, got '{}'",
                self.bridge.url
            ));
        }

        if !self.reconnect.multiplier.is_finite() || self.reconnect.multiplier < 1.0 {
            return Err(anyhow!(
                "reconnect.multiplier must be a finite number >= 1.0, got {}",
                self.reconnect.multiplier
            ));
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err(anyhow!("reconnect.initial_delay_ms must be greater than 0"));
        }
        if self.reconnect.max_attempts == Some(0) {
            return Err(anyhow!("reconnect.max_attempts must be at least 1 when set"));
        }

        if self.gateway.auth_token.is_empty() {
            warn!("No gateway auth token configured (set API_TOKEN); every authenticated request will be refused");
        }
        Ok(())
    }
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &["API_TOKEN", "CHATRELAY_BRIDGE_URL", "PORT", "HOME", "USER"];

fn expand_env_vars(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let var_name = &rest[start + 2..start + len];
        result.push_str(&rest[..start]);
        if ALLOWED_ENV_VARS.contains(&var_name) {
            result.push_str(&lookup(var_name).unwrap_or_default());
        } else {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            result.push_str(&rest[start..=start + len]);
        }
        rest = &rest[start + len + 1..];
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600)).unwrap();
        }
        file
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.reconnect.policy(), ReconnectPolicy::default());
        assert_eq!(config.bridge.client_config().ack_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_default_toml_parses() {
        let expanded = expand_env_vars(
            include_str!("../../../config/default.toml"),
            env(&[("API_TOKEN", "s3cret")]),
        );
        let config: RelayConfig = toml::from_str(&expanded).unwrap();
        assert_eq!(config.gateway.auth_token, "s3cret");
        assert_eq!(config.reconnect.max_attempts, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_expand_env_vars_allowlist() {
        let out = expand_env_vars(
            "a = \"${API_TOKEN}\"\nb = \"${SECRET_THING}\"\nc = \"${PORT}\"",
            env(&[("API_TOKEN", "tok"), ("SECRET_THING", "leak")]),
        );
        assert_eq!(out, "a = \"tok\"\nb = \"${SECRET_THING}\"\nc = \"\"");
    }

    #[test]
    fn test_expand_env_vars_unterminated() {
        assert_eq!(expand_env_vars("x = \"${API_TOKEN", env(&[])), "x = \"${API_TOKEN");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RelayConfig::default();
        config
            .apply_overrides(env(&[
                ("PORT", "8080"),
                ("API_TOKEN", "tok"),
                ("CHATRELAY_BRIDGE_URL", "wss://bridge.local/ws"),
            ]))
            .unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.auth_token, "tok");
        assert_eq!(config.bridge.url, "wss://bridge.local/ws");
    }

    #[test]
    fn test_bad_port_override() {
        let mut config = RelayConfig::default();
        assert!(config.apply_overrides(env(&[("PORT", "http")])).is_err());
    }

    #[test]
    fn test_validate_rejects_http_bridge() {
        let mut config = RelayConfig::default();
        config.bridge.url = "http://127.0.0.1:3100".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_policy() {
        let mut config = RelayConfig::default();
        config.reconnect.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.reconnect.max_attempts = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_initial_delay() {
        let mut config = RelayConfig::default();
        config.reconnect.initial_delay_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("initial_delay_ms"));

        let mut config = RelayConfig::default();
        config.reconnect.initial_delay_ms = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let file = write_config("[gateway]\nport = 4000\n\n[reconnect]\nmax_attempts = 5\n");
        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.gateway.port, 4000);
        assert_eq!(config.gateway.bind, "0.0.0.0");
        assert_eq!(config.reconnect.policy().max_attempts, Some(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_from_file_rejects_world_readable() {
        use std::os::unix::fs::PermissionsExt;
        let file = write_config("[gateway]\n");
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(RelayConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_bind_addr() {
        let mut gateway = GatewayConfig::default();
        assert_eq!(gateway.bind_addr().unwrap().to_string(), "0.0.0.0:3000");
        gateway.bind = "::1".to_string();
        assert_eq!(gateway.bind_addr().unwrap().to_string(), "[::1]:3000");
        gateway.bind = "localhost".to_string();
        assert!(gateway.bind_addr().is_err());
    }

    #[test]
    fn test_debug_masks_token() {
        let gateway = GatewayConfig {
            auth_token: "supersecrettoken".to_string(),
            ..Default::default()
        };
        let debug = format!("{:?}", gateway);
        assert!(!debug.contains("supersecrettoken"));
        assert!(debug.contains("sup...oken"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
    }
}
