use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_STATUS_URL: &str = "https://status.bitrix24.ru/";
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Typed configuration for the status relay.
///
/// Every field can be set through the environment (or a `.env` file in the
/// working directory, which never overrides variables that are already set).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub bot_token: String,
    pub alert_groups: Vec<i64>,
    pub admin_chat_id: Option<i64>,

    // Status source
    pub status_url: String,
    pub check_interval: Duration,
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub cache_ttl: Duration,

    // Storage
    pub subscribers_file: PathBuf,
    pub incidents_file: PathBuf,
    pub metrics_file: PathBuf,

    // Logging
    pub log_level: String,
    pub log_file: Option<PathBuf>,

    // Alerting
    pub alert_on_issues: bool,
    pub alert_on_recovery: bool,
    pub dedup_window: Duration,
    pub group_interval: Duration,
    pub health_check_interval: Duration,

    // Dispatch
    pub dispatch_concurrency: usize,
    pub send_timeout: Duration,
    pub remove_blocked_subscribers: bool,
}

impl Config {
    /// Load from the process environment and validate.
    pub fn load() -> Result<Self> {
        let cfg = Self::from_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from the process environment without validating.
    ///
    /// The health check uses this so it can report *which* setting is wrong.
    pub fn from_env() -> Self {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let get: &Lookup<'_> = &get;

        let bot_token = env_str(get, "BOT_TOKEN").unwrap_or_default();

        let mut alert_groups = Vec::new();
        let single = env_str(get, "GROUP_ID").and_then(|s| s.trim().parse::<i64>().ok());
        for id in single
            .into_iter()
            .chain(parse_csv_i64(env_str(get, "GROUP_IDS")))
        {
            if !alert_groups.contains(&id) {
                alert_groups.push(id);
            }
        }
        let admin_chat_id = env_str(get, "ADMIN_CHAT_ID").and_then(|s| s.trim().parse().ok());

        let status_url = env_str(get, "URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_STATUS_URL.to_string());
        let check_interval = Duration::from_secs(env_u64(get, "CHECK_INTERVAL").unwrap_or(300));
        let request_timeout = Duration::from_secs(env_u64(get, "REQUEST_TIMEOUT").unwrap_or(10));
        let retry_attempts = env_u32(get, "RETRY_ATTEMPTS").unwrap_or(3);
        let retry_delay = Duration::from_secs(env_u64(get, "RETRY_DELAY").unwrap_or(5));
        let cache_ttl = Duration::from_secs(env_u64(get, "CACHE_TTL").unwrap_or(30));

        let subscribers_file =
            env_path(get, "SUBSCRIBERS_FILE").unwrap_or_else(|| "data/subscribers.json".into());
        let incidents_file =
            env_path(get, "INCIDENTS_FILE").unwrap_or_else(|| "data/incidents.json".into());
        let metrics_file =
            env_path(get, "METRICS_FILE").unwrap_or_else(|| "data/metrics.json".into());

        let log_level = env_str(get, "LOG_LEVEL")
            .and_then(non_empty)
            .unwrap_or_else(|| "INFO".to_string());
        // An explicitly empty LOG_FILE turns file logging off.
        let log_file = match env_str(get, "LOG_FILE") {
            Some(v) => non_empty(v).map(PathBuf::from),
            None => Some(PathBuf::from("logs/bot.log")),
        };

        let alert_on_issues = env_bool(get, "ALERT_ON_ISSUES").unwrap_or(true);
        let alert_on_recovery = env_bool(get, "ALERT_ON_RECOVERY").unwrap_or(true);
        let dedup_window = Duration::from_secs(env_u64(get, "DEDUP_WINDOW").unwrap_or(300));
        let group_interval = Duration::from_secs(env_u64(get, "GROUP_INTERVAL").unwrap_or(30));
        let health_check_interval =
            Duration::from_secs(env_u64(get, "HEALTH_CHECK_INTERVAL").unwrap_or(3600));

        let dispatch_concurrency = env_usize(get, "DISPATCH_CONCURRENCY").unwrap_or(8);
        let send_timeout = Duration::from_secs(env_u64(get, "SEND_TIMEOUT").unwrap_or(15));
        let remove_blocked_subscribers =
            env_bool(get, "REMOVE_BLOCKED_SUBSCRIBERS").unwrap_or(true);

        Self {
            bot_token,
            alert_groups,
            admin_chat_id,
            status_url,
            check_interval,
            request_timeout,
            retry_attempts,
            retry_delay,
            cache_ttl,
            subscribers_file,
            incidents_file,
            metrics_file,
            log_level,
            log_file,
            alert_on_issues,
            alert_on_recovery,
            dedup_window,
            group_interval,
            health_check_interval,
            dispatch_concurrency,
            send_timeout,
            remove_blocked_subscribers,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let token = self.bot_token.trim();
        if token.is_empty() {
            return Err(Error::Config(
                "BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if !token.contains(':') {
            return Err(Error::Config(
                "BOT_TOKEN does not look like a Telegram bot token".to_string(),
            ));
        }
        if self.check_interval < MIN_CHECK_INTERVAL {
            return Err(Error::Config(format!(
                "CHECK_INTERVAL must be at least {} seconds",
                MIN_CHECK_INTERVAL.as_secs()
            )));
        }
        if !(self.status_url.starts_with("http://") || self.status_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "URL must be an http(s) address, got {}",
                self.status_url
            )));
        }
        if self.retry_attempts == 0 {
            return Err(Error::Config("RETRY_ATTEMPTS must be at least 1".to_string()));
        }
        if self.dispatch_concurrency == 0 {
            return Err(Error::Config(
                "DISPATCH_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.send_timeout.is_zero() {
            return Err(Error::Config("SEND_TIMEOUT must be positive".to_string()));
        }
        Ok(())
    }

    pub fn is_admin(&self, chat_id: i64) -> bool {
        self.admin_chat_id == Some(chat_id)
    }

    /// Token with the secret half masked, safe for logs and health output.
    pub fn redacted_token(&self) -> String {
        match self.bot_token.split_once(':') {
            Some((id, _)) => format!("{id}:***"),
            None if self.bot_token.is_empty() => "(unset)".to_string(),
            None => "***".to_string(),
        }
    }
}

type Lookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

fn env_str(get: &Lookup<'_>, key: &str) -> Option<String> {
    get(key)
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(get: &Lookup<'_>, key: &str) -> Option<bool> {
    env_str(get, key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(get: &Lookup<'_>, key: &str) -> Option<u64> {
    env_str(get, key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(get: &Lookup<'_>, key: &str) -> Option<u32> {
    env_str(get, key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(get: &Lookup<'_>, key: &str) -> Option<usize> {
    env_str(get, key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(get: &Lookup<'_>, key: &str) -> Option<PathBuf> {
    env_str(get, key).and_then(non_empty).map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = cfg_from(&[("BOT_TOKEN", "123:abc")]);
        assert_eq!(cfg.status_url, DEFAULT_STATUS_URL);
        assert_eq!(cfg.check_interval, Duration::from_secs(300));
        assert_eq!(cfg.subscribers_file, PathBuf::from("data/subscribers.json"));
        assert_eq!(cfg.log_file, Some(PathBuf::from("logs/bot.log")));
        assert_eq!(cfg.retry_attempts, 3);
        assert!(cfg.alert_on_issues && cfg.alert_on_recovery);
        assert!(cfg.alert_groups.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn reads_log_and_subscriber_paths() {
        let cfg = cfg_from(&[
            ("BOT_TOKEN", "123:abc"),
            ("LOG_FILE", "/var/log/b24mon.log"),
            ("SUBSCRIBERS_FILE", "/srv/subs.json"),
        ]);
        assert_eq!(cfg.log_file, Some(PathBuf::from("/var/log/b24mon.log")));
        assert_eq!(cfg.subscribers_file, PathBuf::from("/srv/subs.json"));

        let cfg = cfg_from(&[("BOT_TOKEN", "123:abc"), ("LOG_FILE", "  ")]);
        assert_eq!(cfg.log_file, None);
    }

    #[test]
    fn merges_and_dedups_alert_groups() {
        let cfg = cfg_from(&[
            ("BOT_TOKEN", "123:abc"),
            ("GROUP_ID", "-100"),
            ("GROUP_IDS", "-200, -100,,oops,-300"),
        ]);
        assert_eq!(cfg.alert_groups, vec![-100, -200, -300]);
    }

    #[test]
    fn rejects_bad_token_and_short_interval() {
        let cfg = cfg_from(&[]);
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let cfg = cfg_from(&[("BOT_TOKEN", "nocolon")]);
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let cfg = cfg_from(&[("BOT_TOKEN", "1:a"), ("CHECK_INTERVAL", "59")]);
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("CHECK_INTERVAL"), "{err}");
    }

    #[test]
    fn redacts_token_secret() {
        let cfg = cfg_from(&[("BOT_TOKEN", "12345:SECRET")]);
        assert_eq!(cfg.redacted_token(), "12345:***");
    }
}
