use anyhow::{Context, Result, anyhow, bail};
use chrono::Duration;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/vidtube-env";
pub const DEFAULT_VIDTUBE_PORT: u16 = 8000;
pub const DEFAULT_VIDTUBE_HOST: &str = "127.0.0.1";
pub const DEFAULT_MEDIA_PUBLIC_URL: &str = "/media";
pub const DEFAULT_ACCESS_TOKEN_EXPIRY: &str = "1d";
pub const DEFAULT_REFRESH_TOKEN_EXPIRY: &str = "10d";
pub const DEFAULT_MAX_UPLOAD_MB: u64 = 512;

/// Every key the loader understands, in the order they are documented.
pub const CONFIG_KEYS: &[&str] = &[
    "DATABASE_PATH",
    "MEDIA_ROOT",
    "MEDIA_PUBLIC_URL",
    "UPLOAD_DIR",
    "VIDTUBE_HOST",
    "VIDTUBE_PORT",
    "ACCESS_TOKEN_SECRET",
    "ACCESS_TOKEN_EXPIRY",
    "REFRESH_TOKEN_SECRET",
    "REFRESH_TOKEN_EXPIRY",
    "MAX_UPLOAD_MB",
    "COOKIE_SECURE",
];

/// Raw values as found in the env file and process environment. Nothing is
/// required at this stage; `resolve` decides what is mandatory.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub database_path: Option<PathBuf>,
    pub media_root: Option<PathBuf>,
    pub media_public_url: Option<String>,
    pub upload_dir: Option<PathBuf>,
    pub vidtube_host: Option<String>,
    pub vidtube_port: Option<u16>,
    pub access_token_secret: Option<String>,
    pub access_token_expiry: Option<String>,
    pub refresh_token_secret: Option<String>,
    pub refresh_token_expiry: Option<String>,
    pub max_upload_mb: Option<u64>,
    pub cookie_secure: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub database_path: PathBuf,
    pub media_root: PathBuf,
    pub media_public_url: String,
    pub upload_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub access_token_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_secret: String,
    pub refresh_token_ttl: Duration,
    pub max_upload_bytes: usize,
    pub cookie_secure: bool,
}

impl EnvConfig {
    /// Stores a single `KEY=value` pair. Unknown keys are ignored so the same
    /// file can carry settings for other services.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "DATABASE_PATH" => self.database_path = non_empty(value).map(PathBuf::from),
            "MEDIA_ROOT" => self.media_root = non_empty(value).map(PathBuf::from),
            "MEDIA_PUBLIC_URL" => {
                self.media_public_url = non_empty(value).map(|v| v.trim_end_matches('/').to_string())
            }
            "UPLOAD_DIR" => self.upload_dir = non_empty(value).map(PathBuf::from),
            "VIDTUBE_HOST" => self.vidtube_host = non_empty(value).map(str::to_string),
            "VIDTUBE_PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("parsing VIDTUBE_PORT value {value:?}"))?;
                self.vidtube_port = Some(port);
            }
            "ACCESS_TOKEN_SECRET" => self.access_token_secret = non_empty(value).map(str::to_string),
            "ACCESS_TOKEN_EXPIRY" => self.access_token_expiry = non_empty(value).map(str::to_string),
            "REFRESH_TOKEN_SECRET" => {
                self.refresh_token_secret = non_empty(value).map(str::to_string)
            }
            "REFRESH_TOKEN_EXPIRY" => {
                self.refresh_token_expiry = non_empty(value).map(str::to_string)
            }
            "MAX_UPLOAD_MB" => {
                let mb: u64 = value
                    .parse()
                    .with_context(|| format!("parsing MAX_UPLOAD_MB value {value:?}"))?;
                self.max_upload_mb = Some(mb);
            }
            "COOKIE_SECURE" => self.cookie_secure = Some(parse_bool(value)?),
            _ => {}
        }
        Ok(())
    }

    /// Lets process environment variables win over file values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in CONFIG_KEYS {
            if let Some(value) = lookup(key) {
                self.set(key, &value)?;
            }
        }
        Ok(())
    }

    pub fn resolve(self) -> Result<RuntimeConfig> {
        let database_path = self
            .database_path
            .ok_or_else(|| anyhow!("DATABASE_PATH is not set"))?;
        let media_root = self
            .media_root
            .ok_or_else(|| anyhow!("MEDIA_ROOT is not set"))?;
        let access_token_secret = self
            .access_token_secret
            .ok_or_else(|| anyhow!("ACCESS_TOKEN_SECRET is not set"))?;
        let refresh_token_secret = self
            .refresh_token_secret
            .ok_or_else(|| anyhow!("REFRESH_TOKEN_SECRET is not set"))?;

        let access_token_ttl = parse_expiry(
            self.access_token_expiry
                .as_deref()
                .unwrap_or(DEFAULT_ACCESS_TOKEN_EXPIRY),
        )
        .context("ACCESS_TOKEN_EXPIRY")?;
        let refresh_token_ttl = parse_expiry(
            self.refresh_token_expiry
                .as_deref()
                .unwrap_or(DEFAULT_REFRESH_TOKEN_EXPIRY),
        )
        .context("REFRESH_TOKEN_EXPIRY")?;

        let max_upload_mb = self.max_upload_mb.unwrap_or(DEFAULT_MAX_UPLOAD_MB);
        let max_upload_bytes = usize::try_from(max_upload_mb.saturating_mul(1024 * 1024))
            .context("MAX_UPLOAD_MB does not fit in memory on this platform")?;

        Ok(RuntimeConfig {
            database_path,
            media_root,
            media_public_url: self
                .media_public_url
                .unwrap_or_else(|| DEFAULT_MEDIA_PUBLIC_URL.to_string()),
            upload_dir: self.upload_dir.unwrap_or_else(std::env::temp_dir),
            host: self
                .vidtube_host
                .unwrap_or_else(|| DEFAULT_VIDTUBE_HOST.to_string()),
            port: self.vidtube_port.unwrap_or(DEFAULT_VIDTUBE_PORT),
            access_token_secret,
            access_token_ttl,
            refresh_token_secret,
            refresh_token_ttl,
            max_upload_bytes,
            cookie_secure: self.cookie_secure.unwrap_or(true),
        })
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            cfg.set(key.trim(), value)
                .with_context(|| format!("in {}", path.display()))?;
        }
    }
    Ok(Some(cfg))
}

/// A missing file is fine as long as the environment supplies the required
/// keys.
pub fn load_runtime_config_from<F>(path: impl AsRef<Path>, lookup: F) -> Result<RuntimeConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let path = path.as_ref();
    let mut cfg = read_env_config(path)?.unwrap_or_default();
    cfg.apply_overrides(lookup)?;
    cfg.resolve()
        .with_context(|| format!("loading configuration (file {})", path.display()))
}

/// Accepts `30s`, `15m`, `12h`, `10d` or a bare number of seconds.
pub fn parse_expiry(value: &str) -> Result<Duration> {
    let value = value.trim();
    if value.is_empty() {
        bail!("empty expiry");
    }
    let (digits, unit) = match value.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&value[..idx], Some(c)),
        _ => (value, None),
    };
    let amount: i64 = digits
        .parse()
        .with_context(|| format!("invalid expiry {value:?}"))?;
    if amount <= 0 {
        bail!("expiry must be positive, got {value:?}");
    }
    let duration = match unit {
        None | Some('s') => Duration::try_seconds(amount),
        Some('m') => Duration::try_minutes(amount),
        Some('h') => Duration::try_hours(amount),
        Some('d') => Duration::try_days(amount),
        Some(other) => bail!("unknown expiry unit {other:?} in {value:?}"),
    };
    duration.ok_or_else(|| anyhow!("expiry {value:?} is out of range"))
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}
