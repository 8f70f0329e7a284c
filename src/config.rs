use crate::error::{MonitorError, Result};
use anyhow::Context;
use bigdecimal::BigDecimal;
use jiff::tz::Offset;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

pub const DEFAULT_BASE_URL: &str = "https://www.wap.ekm365.com/nat/pay.aspx";
pub const DEFAULT_MID: &str = "20710001759";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
/// The billing site reports in China Standard Time.
pub const DEFAULT_UTC_OFFSET_HOURS: i8 = 8;

static PLACEHOLDER: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^\$\{([A-Z0-9_]+)\}$").expect("valid placeholder regex"));

/// Environment lookup, injectable so resolution can be tested without touching the process env.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Contents of `config.yaml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default, deserialize_with = "scalar_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub mid: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub meter: MeterSection,
    #[serde(default)]
    pub notify: NotifySection,
    pub utc_offset: Option<i8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeterSection {
    #[serde(default, deserialize_with = "scalar_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub mid: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifySection {
    #[serde(default, deserialize_with = "scalar_string")]
    pub issue: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub repository: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub alert_balance: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub alert_days: Option<String>,
}

// Meter ids and issue numbers are often written unquoted in YAML.
fn scalar_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_yaml::Value::String(s)) => Some(s),
        Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl ConfigFile {
    /// Load the config file named by `--config`, `POWER_MONITOR_CONFIG`, or `config.yaml`.
    /// A missing file is an empty config.
    pub fn load(cli_path: Option<&Path>, env: EnvLookup) -> Result<Self> {
        let path = match cli_path {
            Some(path) => path.to_path_buf(),
            None => env_string(env, "POWER_MONITOR_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };
        if !path.is_file() {
            tracing::debug!("no config file at {}", path.display());
            return Ok(Self::default());
        }
        Self::read(&path).map_err(|e| MonitorError::Config(format!("{e:#}")))
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config YAML: {}", path.display()))
    }
}

/// Everything the run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub url: String,
    pub utc_offset: Offset,
    pub notify: NotifySettings,
    /// Job summary file the markdown report is appended to.
    pub summary_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct NotifySettings {
    pub issue: Option<String>,
    pub token: Option<String>,
    pub repository: Option<String>,
    pub api_url: String,
    pub alert_balance: Option<BigDecimal>,
    pub alert_days: Option<BigDecimal>,
}

impl Settings {
    pub fn resolve(cli_url: Option<&str>, file: &ConfigFile, env: EnvLookup) -> Result<Self> {
        let url = resolve_url(cli_url, file, env);
        let hours = file.utc_offset.unwrap_or(DEFAULT_UTC_OFFSET_HOURS);
        let utc_offset = Offset::from_hours(hours)
            .map_err(|e| MonitorError::Config(format!("invalid utc_offset {hours}: {e}")))?;

        let notify = NotifySettings {
            issue: env_string(env, "POWER_MONITOR_ISSUE")
                .or_else(|| resolve_value(file.notify.issue.as_deref(), env)),
            token: env_string(env, "GITHUB_TOKEN"),
            repository: env_string(env, "GITHUB_REPOSITORY")
                .or_else(|| resolve_value(file.notify.repository.as_deref(), env)),
            api_url: env_string(env, "GITHUB_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            alert_balance: parse_threshold(
                "alert_balance",
                file.notify.alert_balance.as_deref(),
                env,
            )?,
            alert_days: parse_threshold("alert_days", file.notify.alert_days.as_deref(), env)?,
        };

        Ok(Self {
            url,
            utc_offset,
            notify,
            summary_path: env_string(env, "GITHUB_STEP_SUMMARY").map(PathBuf::from),
        })
    }
}

fn parse_threshold(key: &str, raw: Option<&str>, env: EnvLookup) -> Result<Option<BigDecimal>> {
    resolve_value(raw, env)
        .map(|v| {
            BigDecimal::from_str(&v)
                .map_err(|_| MonitorError::Config(format!("notify.{key} is not a number: {v:?}")))
        })
        .transpose()
}

pub fn resolve_url(cli_url: Option<&str>, file: &ConfigFile, env: EnvLookup) -> String {
    if let Some(url) = cli_url.map(str::trim).filter(|u| !u.is_empty()) {
        return url.to_string();
    }
    if let Some(url) = env_string(env, "POWER_MONITOR_URL") {
        return url;
    }
    let config_url = resolve_value(file.url.as_deref(), env)
        .or_else(|| resolve_value(file.meter.url.as_deref(), env));
    if let Some(url) = config_url {
        return url;
    }

    let mid = env_string(env, "POWER_MONITOR_MID")
        .or_else(|| resolve_value(file.mid.as_deref(), env))
        .or_else(|| resolve_value(file.meter.mid.as_deref(), env));
    let base = env_string(env, "POWER_MONITOR_BASE_URL")
        .or_else(|| resolve_value(file.base_url.as_deref(), env))
        .or_else(|| resolve_value(file.meter.base_url.as_deref(), env));
    match mid {
        Some(mid) => url_from_mid(&mid, base.as_deref()),
        None => url_from_mid(DEFAULT_MID, None),
    }
}

pub fn url_from_mid(mid: &str, base_url: Option<&str>) -> String {
    let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('?');
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}mid={mid}")
}

fn env_string(env: EnvLookup, name: &str) -> Option<String> {
    env(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Trim a config value and expand a whole-value `${NAME}` placeholder from the environment.
fn resolve_value(raw: Option<&str>, env: EnvLookup) -> Option<String> {
    let value = raw?.trim();
    if value.is_empty() {
        return None;
    }
    match PLACEHOLDER.captures(value) {
        Some(caps) => env_string(env, &caps[1]),
        None => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn parse(yaml: &str) -> ConfigFile {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn default_url_when_nothing_configured() {
        let env = env_of(&[]);
        let url = resolve_url(None, &ConfigFile::default(), &env);
        assert_eq!(url, "https://www.wap.ekm365.com/nat/pay.aspx?mid=20710001759");
    }

    #[test]
    fn cli_url_beats_env_and_config() {
        let env = env_of(&[("POWER_MONITOR_URL", "https://env.example/")]);
        let file = parse("url: https://file.example/");
        assert_eq!(
            resolve_url(Some("https://cli.example/"), &file, &env),
            "https://cli.example/"
        );
        assert_eq!(resolve_url(None, &file, &env), "https://env.example/");
    }

    #[test]
    fn mid_is_appended_to_base_with_the_right_separator() {
        assert_eq!(
            url_from_mid("42", Some("https://x.example/pay?")),
            "https://x.example/pay?mid=42"
        );
        assert_eq!(
            url_from_mid("42", Some("https://x.example/pay?a=1")),
            "https://x.example/pay?a=1&mid=42"
        );
    }

    #[test]
    fn numeric_mid_and_nested_meter_section() {
        let file = parse("meter:\n  mid: 12345\n  base_url: https://m.example/pay\n");
        let env = env_of(&[]);
        assert_eq!(resolve_url(None, &file, &env), "https://m.example/pay?mid=12345");
    }

    #[test]
    fn placeholders_expand_from_env() {
        let file = parse("mid: ${METER_ID}\nnotify:\n  issue: ${ISSUE}\n");
        let env = env_of(&[("METER_ID", "777"), ("ISSUE", " ")]);
        assert_eq!(resolve_url(None, &file, &env), url_from_mid("777", None));
        let settings = Settings::resolve(None, &file, &env).unwrap();
        assert_eq!(settings.notify.issue, None);
    }

    #[test]
    fn settings_pick_up_notification_env() {
        let file = parse("notify:\n  alert_balance: 20\n  alert_days: '3.5'\n");
        let env = env_of(&[
            ("POWER_MONITOR_ISSUE", "12"),
            ("GITHUB_TOKEN", "t0k"),
            ("GITHUB_REPOSITORY", "me/dorm"),
            ("GITHUB_STEP_SUMMARY", "/tmp/summary.md"),
        ]);
        let settings = Settings::resolve(None, &file, &env).unwrap();
        assert_eq!(settings.notify.issue.as_deref(), Some("12"));
        assert_eq!(settings.notify.token.as_deref(), Some("t0k"));
        assert_eq!(settings.notify.repository.as_deref(), Some("me/dorm"));
        assert_eq!(settings.notify.api_url, DEFAULT_API_URL);
        assert_eq!(settings.notify.alert_balance, Some(BigDecimal::from(20)));
        assert_eq!(settings.notify.alert_days, Some(BigDecimal::from_str("3.5").unwrap()));
        assert_eq!(settings.summary_path, Some(PathBuf::from("/tmp/summary.md")));
        assert_eq!(settings.utc_offset, Offset::from_hours(8).unwrap());
    }

    #[test]
    fn bad_threshold_is_a_config_error() {
        let file = parse("notify:\n  alert_days: soon\n");
        let env = env_of(&[]);
        assert!(matches!(
            Settings::resolve(None, &file, &env),
            Err(MonitorError::Config(_))
        ));
    }

    #[test]
    fn missing_and_empty_files_load_as_default() {
        let env = env_of(&[]);
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(ConfigFile::load(Some(missing.as_path()), &env).unwrap().url.is_none());

        let empty = dir.path().join("empty.yaml");
        fs::write(&empty, "\n").unwrap();
        assert!(ConfigFile::load(Some(empty.as_path()), &env).unwrap().mid.is_none());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let env = env_of(&[]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "- just\n- a list\n").unwrap();
        assert!(matches!(
            ConfigFile::load(Some(path.as_path()), &env),
            Err(MonitorError::Config(_))
        ));
    }
}
