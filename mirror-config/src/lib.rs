//! Typed configuration: parses `config.toml` (optional — a defaulted
//! config is used if the file is absent), seeds default registries, then
//! applies environment overrides. CIDR and wildcard patterns are compiled
//! eagerly so a typo in the file is a startup error, not a runtime one.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use mirror_access::{AccessPolicy, Gate, PatternList};
use mirror_cidr::Cidr;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid CIDR {0:?}")]
    InvalidCidr(String),
    #[error("invalid pattern {0:?}")]
    InvalidPattern(String),
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnvVar { name: &'static str, value: String },
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    server: Option<RawServer>,
    rate_limit: Option<RawRateLimit>,
    security: Option<RawSecurity>,
    access: Option<RawAccess>,
    registries: Option<HashMap<String, RawRegistry>>,
    token_cache: Option<RawTokenCache>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServer {
    host: Option<String>,
    port: Option<u16>,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRateLimit {
    request_limit: Option<u32>,
    period_hours: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawSecurity {
    #[serde(default)]
    white_list: Vec<String>,
    #[serde(default)]
    black_list: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawAccess {
    #[serde(default)]
    white_list: Vec<String>,
    #[serde(default)]
    black_list: Vec<String>,
    proxy: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRegistry {
    upstream: String,
    auth_host: Option<String>,
    auth_type: AuthDialect,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTokenCache {
    enabled: Option<bool>,
    default_ttl: Option<String>,
}

/// Which token-acquisition dialect a registry speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthDialect {
    DockerHub,
    Github,
    Google,
    Quay,
    Anonymous,
    Generic,
}

/// A configured upstream registry.
#[derive(Debug, Clone)]
pub struct RegistryDescriptor {
    pub host: String,
    pub upstream: String,
    pub auth_host: Option<String>,
    pub auth_dialect: AuthDialect,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub file_size: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub request_limit: u32,
    pub period_hours: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    pub allow: Vec<Cidr>,
    pub deny: Vec<Cidr>,
}

#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub policy: AccessPolicy,
    pub proxy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TokenCacheConfig {
    pub enabled: bool,
    pub default_ttl: Duration,
}

/// The fully resolved, immutable-after-load configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
    pub access: AccessConfig,
    pub registries: HashMap<String, RegistryDescriptor>,
    pub token_cache: TokenCacheConfig,
}

impl Config {
    /// Loads from an optional `config.toml` at `path`, then applies
    /// environment overrides. A missing file is not an error — the
    /// defaults below are used instead.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let raw = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Io {
                    path: p.display().to_string(),
                    source,
                })?;
                toml::from_str(&text)?
            }
            _ => RawConfig::default(),
        };
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let server = ServerConfig {
            host: raw
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: raw.server.as_ref().and_then(|s| s.port).unwrap_or(8080),
            file_size: raw
                .server
                .as_ref()
                .and_then(|s| s.file_size)
                .unwrap_or(100 * 1024 * 1024),
        };

        let rate_limit = RateLimitConfig {
            request_limit: raw
                .rate_limit
                .as_ref()
                .and_then(|r| r.request_limit)
                .unwrap_or(100),
            period_hours: raw
                .rate_limit
                .as_ref()
                .and_then(|r| r.period_hours)
                .unwrap_or(1.0),
        };

        let raw_security = raw.security.unwrap_or_default();
        let allow = compile_cidrs(&raw_security.white_list)?;
        let deny = compile_cidrs(&raw_security.black_list)?;
        let security = SecurityConfig { allow, deny };

        let raw_access = raw.access.unwrap_or_default();
        let allow_patterns = PatternList::compile(&raw_access.white_list)
            .map_err(|_| ConfigError::InvalidPattern(raw_access.white_list.join(",")))?;
        let deny_patterns = PatternList::compile(&raw_access.black_list)
            .map_err(|_| ConfigError::InvalidPattern(raw_access.black_list.join(",")))?;
        let gate = Gate::new(allow_patterns, deny_patterns);
        let access = AccessConfig {
            policy: AccessPolicy {
                github: gate.clone(),
                docker: gate,
            },
            proxy: raw_access.proxy,
        };

        let mut registries = default_registries();
        for (host, r) in raw.registries.unwrap_or_default() {
            registries.insert(
                host.clone(),
                RegistryDescriptor {
                    host,
                    upstream: r.upstream,
                    auth_host: r.auth_host,
                    auth_dialect: r.auth_type,
                    enabled: r.enabled,
                },
            );
        }

        let raw_token_cache = raw.token_cache;
        let default_ttl_str = raw_token_cache
            .as_ref()
            .and_then(|t| t.default_ttl.clone())
            .unwrap_or_else(|| "20m".to_string());
        let token_cache = TokenCacheConfig {
            enabled: raw_token_cache.as_ref().and_then(|t| t.enabled).unwrap_or(true),
            default_ttl: parse_duration(&default_ttl_str)?,
        };

        let mut config = Config {
            server,
            rate_limit,
            security,
            access,
            registries,
            token_cache,
        };
        apply_env_overrides(&mut config)?;
        Ok(config)
    }
}

fn default_registries() -> HashMap<String, RegistryDescriptor> {
    let mut map = HashMap::new();
    for (host, dialect) in [
        ("ghcr.io", AuthDialect::Github),
        ("gcr.io", AuthDialect::Google),
        ("quay.io", AuthDialect::Quay),
        ("registry.k8s.io", AuthDialect::Anonymous),
    ] {
        map.insert(
            host.to_string(),
            RegistryDescriptor {
                host: host.to_string(),
                upstream: host.to_string(),
                auth_host: None,
                auth_dialect: dialect,
                enabled: true,
            },
        );
    }
    map
}

fn compile_cidrs(patterns: &[String]) -> Result<Vec<Cidr>, ConfigError> {
    patterns
        .iter()
        .map(|s| mirror_cidr::parse_cidr(s).ok_or_else(|| ConfigError::InvalidCidr(s.clone())))
        .collect()
}

/// Parses a short duration string like `20m`, `15m`, `2h`, `30s`.
fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let (digits, unit) = s.split_at(s.len().saturating_sub(1));
    let n: u64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(s.to_string()))?;
    match unit {
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        _ => Err(ConfigError::InvalidDuration(s.to_string())),
    }
}

fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(v) = std::env::var("SERVER_HOST") {
        config.server.host = v;
    }
    if let Ok(v) = std::env::var("SERVER_PORT") {
        config.server.port = v
            .parse()
            .map_err(|_| ConfigError::InvalidEnvVar { name: "SERVER_PORT", value: v })?;
    }
    if let Ok(v) = std::env::var("MAX_FILE_SIZE") {
        config.server.file_size = v
            .parse()
            .map_err(|_| ConfigError::InvalidEnvVar { name: "MAX_FILE_SIZE", value: v })?;
    }
    if let Ok(v) = std::env::var("RATE_LIMIT") {
        config.rate_limit.request_limit = v
            .parse()
            .map_err(|_| ConfigError::InvalidEnvVar { name: "RATE_LIMIT", value: v })?;
    }
    if let Ok(v) = std::env::var("RATE_PERIOD_HOURS") {
        config.rate_limit.period_hours = v
            .parse()
            .map_err(|_| ConfigError::InvalidEnvVar { name: "RATE_PERIOD_HOURS", value: v })?;
    }
    if let Ok(v) = std::env::var("IP_WHITELIST") {
        for entry in v.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            config
                .security
                .allow
                .push(mirror_cidr::parse_cidr(entry).ok_or_else(|| ConfigError::InvalidCidr(entry.to_string()))?);
        }
    }
    if let Ok(v) = std::env::var("IP_BLACKLIST") {
        for entry in v.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            config
                .security
                .deny
                .push(mirror_cidr::parse_cidr(entry).ok_or_else(|| ConfigError::InvalidCidr(entry.to_string()))?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.registries.contains_key("ghcr.io"));
        assert_eq!(config.registries["quay.io"].auth_dialect, AuthDialect::Quay);
    }

    #[test]
    fn toml_overrides_and_adds_registries() {
        let toml_text = r#"
            [server]
            port = 9000

            [rateLimit]
            requestLimit = 50
            periodHours = 2.0

            [security]
            whiteList = ["10.0.0.0/8"]
            blackList = ["192.168.0.0/16"]

            [access]
            whiteList = ["owner/*"]

            [registries.example.io]
            upstream = "example.io"
            authType = "generic"
            authHost = "auth.example.io"
        "#;
        let raw: RawConfig = toml::from_str(toml_text).unwrap();
        let config = Config::from_raw(raw).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.rate_limit.request_limit, 50);
        assert_eq!(config.security.allow.len(), 1);
        assert_eq!(config.security.deny.len(), 1);
        assert!(config.access.policy.check_github("owner/repo").is_ok());
        assert!(config.registries.contains_key("example.io"));
        // defaults are still present alongside the new entry
        assert!(config.registries.contains_key("ghcr.io"));
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("20m").unwrap(), Duration::from_secs(1200));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("nope").is_err());
    }

    #[test]
    fn invalid_cidr_in_security_section_is_an_error() {
        let raw = RawConfig {
            security: Some(RawSecurity {
                white_list: vec!["not-a-cidr".to_string()],
                black_list: vec![],
            }),
            ..Default::default()
        };
        assert!(Config::from_raw(raw).is_err());
    }
}
