//! Readiness checks shared by the `b24mon-check` binary and the `/health`
//! command.

use std::{fmt, path::Path, sync::Arc};

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{
    config::Config,
    formatting::escape_html,
    messaging::port::MessagingPort,
    status::StatusSource,
    storage,
    subscribers::SubscriberStore,
};

/// Lines of the log file inspected by the log check.
pub const LOG_TAIL_LINES: usize = 20;
const LOG_TAIL_BYTES: u64 = 64 * 1024;

/// Failure classes, ordered by precedence. Each maps to its own exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailureClass {
    Config,
    Storage,
    StatusSource,
    Messaging,
}

impl FailureClass {
    pub fn exit_code(self) -> i32 {
        match self {
            FailureClass::Config => 2,
            FailureClass::Storage => 3,
            FailureClass::StatusSource => 4,
            FailureClass::Messaging => 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Warn,
    Skipped,
    Fail(FailureClass),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckResult {
    fn ok(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn skipped(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, class: FailureClass, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Fail(class),
            detail: detail.into(),
        }
    }

    fn icon(&self) -> &'static str {
        match self.status {
            CheckStatus::Ok => "✅",
            CheckStatus::Warn => "⚠️",
            CheckStatus::Skipped => "⏭️",
            CheckStatus::Fail(_) => "❌",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct HealthReport {
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    /// The most severe failure class present, config first.
    pub fn worst_failure(&self) -> Option<FailureClass> {
        self.checks
            .iter()
            .filter_map(|c| match c.status {
                CheckStatus::Fail(class) => Some(class),
                _ => None,
            })
            .min()
    }

    /// 0 when nothing failed; warnings do not count.
    pub fn exit_code(&self) -> i32 {
        self.worst_failure().map_or(0, FailureClass::exit_code)
    }

    pub fn is_healthy(&self) -> bool {
        self.worst_failure().is_none()
    }

    pub fn warnings(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Warn)
            .count()
    }

    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// Telegram HTML rendering for `/health`.
    pub fn to_html(&self) -> String {
        let mut out = String::from("🏥 <b>Проверка здоровья</b>\n\n");
        for c in &self.checks {
            out.push_str(&format!(
                "{} <b>{}</b>: {}\n",
                c.icon(),
                escape_html(c.name),
                escape_html(&c.detail)
            ));
        }
        out
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.checks {
            let tag = match c.status {
                CheckStatus::Ok => "OK  ",
                CheckStatus::Warn => "WARN",
                CheckStatus::Skipped => "SKIP",
                CheckStatus::Fail(_) => "FAIL",
            };
            writeln!(f, "[{tag}] {:<12} {}", c.name, c.detail)?;
        }
        match self.worst_failure() {
            None => write!(f, "healthy ({} warnings)", self.warnings()),
            Some(class) => write!(f, "unhealthy: {class:?} (exit {})", class.exit_code()),
        }
    }
}

/// Runs every check in order against one configuration.
pub struct HealthCheck<'a> {
    cfg: &'a Config,
    status: Option<Arc<dyn StatusSource>>,
    messenger: Option<Arc<dyn MessagingPort>>,
    offline: bool,
}

impl<'a> HealthCheck<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        Self {
            cfg,
            status: None,
            messenger: None,
            offline: false,
        }
    }

    pub fn with_status_source(mut self, source: Arc<dyn StatusSource>) -> Self {
        self.status = Some(source);
        self
    }

    pub fn with_messenger(mut self, messenger: Arc<dyn MessagingPort>) -> Self {
        self.messenger = Some(messenger);
        self
    }

    /// Skip the status page and Telegram checks.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub async fn run(&self) -> HealthReport {
        let mut checks = vec![
            check_config(self.cfg),
            check_subscribers(&self.cfg.subscribers_file).await,
            check_data_file("incidents", &self.cfg.incidents_file).await,
            check_data_file("metrics", &self.cfg.metrics_file).await,
            check_log_tail(self.cfg.log_file.as_deref()).await,
        ];

        if self.offline {
            checks.push(CheckResult::skipped("status_page", "offline mode"));
            checks.push(CheckResult::skipped("telegram", "offline mode"));
        } else {
            checks.push(match &self.status {
                Some(source) => check_status_source(source.as_ref()).await,
                None => CheckResult::skipped("status_page", "no client configured"),
            });
            checks.push(match &self.messenger {
                Some(m) => check_messenger(m.as_ref()).await,
                None => CheckResult::skipped("telegram", "no bot token"),
            });
        }

        let report = HealthReport { checks };
        if report.is_healthy() {
            tracing::info!(warnings = report.warnings(), "health check passed");
        } else {
            tracing::warn!(exit_code = report.exit_code(), "health check failed");
        }
        report
    }
}

pub fn check_config(cfg: &Config) -> CheckResult {
    const NAME: &str = "config";
    if let Err(e) = cfg.validate() {
        return CheckResult::fail(NAME, FailureClass::Config, e.to_string());
    }
    if cfg.alert_groups.is_empty() && cfg.admin_chat_id.is_none() {
        return CheckResult::warn(
            NAME,
            "no GROUP_ID/GROUP_IDS or ADMIN_CHAT_ID; alerts reach subscribers only",
        );
    }
    CheckResult::ok(
        NAME,
        format!(
            "token {}, {} alert group(s), interval {}s",
            cfg.redacted_token(),
            cfg.alert_groups.len(),
            cfg.check_interval.as_secs()
        ),
    )
}

pub async fn check_subscribers(path: &Path) -> CheckResult {
    const NAME: &str = "subscribers";
    let store = match SubscriberStore::open(path).await {
        Ok(s) => s,
        Err(e) => return CheckResult::fail(NAME, FailureClass::Storage, e.to_string()),
    };
    match store.probe().await {
        Ok(()) => CheckResult::ok(
            NAME,
            format!("{} subscriber(s) in {}", store.count().await, path.display()),
        ),
        Err(e) => CheckResult::fail(NAME, FailureClass::Storage, e.to_string()),
    }
}

/// Incident and metrics files: must parse if present, directory must be writable.
pub async fn check_data_file(name: &'static str, path: &Path) -> CheckResult {
    let exists = match storage::read_json::<serde_json::Value>(path).await {
        Ok(v) => v.is_some(),
        Err(e) => return CheckResult::fail(name, FailureClass::Storage, e.to_string()),
    };
    if let Err(e) = storage::probe(path).await {
        return CheckResult::fail(name, FailureClass::Storage, e.to_string());
    }
    if exists {
        CheckResult::ok(name, path.display().to_string())
    } else {
        CheckResult::ok(name, format!("{} (not created yet)", path.display()))
    }
}

pub async fn check_log_tail(path: Option<&Path>) -> CheckResult {
    const NAME: &str = "log";
    let Some(path) = path else {
        return CheckResult::ok(NAME, "file logging disabled");
    };
    let lines = match read_tail(path, LOG_TAIL_LINES).await {
        Ok(lines) => lines,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return CheckResult::warn(NAME, format!("{} does not exist yet", path.display()))
        }
        Err(e) => return CheckResult::warn(NAME, format!("{}: {e}", path.display())),
    };

    let errors = lines.iter().filter(|l| l.contains("ERROR")).count();
    let warnings = lines.iter().filter(|l| l.contains("WARN")).count();
    let detail = format!(
        "last {} line(s): {errors} error(s), {warnings} warning(s)",
        lines.len()
    );
    if errors > 0 {
        CheckResult::warn(NAME, detail)
    } else {
        CheckResult::ok(NAME, detail)
    }
}

/// Last `n` lines of a file, reading at most the final 64 KiB.
pub async fn read_tail(path: &Path, n: usize) -> std::io::Result<Vec<String>> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(LOG_TAIL_BYTES);
    file.seek(std::io::SeekFrom::Start(start)).await?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;
    let text = String::from_utf8_lossy(&buf);

    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    if start > 0 && !lines.is_empty() {
        // Probably cut mid-line.
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(n);
    Ok(lines.split_off(skip))
}

pub async fn check_status_source(source: &dyn StatusSource) -> CheckResult {
    const NAME: &str = "status_page";
    if source.check_availability().await {
        CheckResult::ok(NAME, format!("{} reachable", source.url()))
    } else {
        CheckResult::fail(
            NAME,
            FailureClass::StatusSource,
            format!("{} unreachable", source.url()),
        )
    }
}

pub async fn check_messenger(messenger: &dyn MessagingPort) -> CheckResult {
    const NAME: &str = "telegram";
    match messenger.probe().await {
        Ok(name) => CheckResult::ok(NAME, format!("authorized as @{name}")),
        Err(e) => CheckResult::fail(NAME, FailureClass::Messaging, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMessenger;
    use async_trait::async_trait;

    struct FixedSource(bool);

    #[async_trait]
    impl StatusSource for FixedSource {
        fn url(&self) -> &str {
            "https://status.example/"
        }

        async fn fetch(&self) -> crate::status::StatusSnapshot {
            crate::status::StatusSnapshot::default()
        }

        async fn check_availability(&self) -> bool {
            self.0
        }
    }

    fn cfg_in(dir: &Path) -> Config {
        let base = dir.to_path_buf();
        Config::from_lookup(move |key| match key {
            "BOT_TOKEN" => Some("123456:abcdef".to_string()),
            "GROUP_ID" => Some("-100".to_string()),
            "SUBSCRIBERS_FILE" => Some(base.join("data/subs.json").display().to_string()),
            "INCIDENTS_FILE" => Some(base.join("data/incidents.json").display().to_string()),
            "METRICS_FILE" => Some(base.join("data/metrics.json").display().to_string()),
            "LOG_FILE" => Some(base.join("logs/bot.log").display().to_string()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn healthy_offline_setup_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_in(dir.path());
        let report = HealthCheck::new(&cfg).offline(true).run().await;

        assert_eq!(report.exit_code(), 0, "{report}");
        assert_eq!(report.get("telegram").unwrap().status, CheckStatus::Skipped);
        // The log file does not exist yet.
        assert_eq!(report.get("log").unwrap().status, CheckStatus::Warn);
    }

    #[tokio::test]
    async fn inaccessible_storage_path_fails_with_storage_code() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let mut cfg = cfg_in(dir.path());
        cfg.subscribers_file = blocker.join("subs.json");
        let report = HealthCheck::new(&cfg).offline(true).run().await;

        assert_eq!(
            report.get("subscribers").unwrap().status,
            CheckStatus::Fail(FailureClass::Storage)
        );
        assert_eq!(report.exit_code(), 3);
        assert!(!report.is_healthy());
    }

    #[tokio::test]
    async fn corrupt_incident_file_is_a_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_in(dir.path());
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(&cfg.incidents_file, "{oops").unwrap();

        let r = check_data_file("incidents", &cfg.incidents_file).await;
        assert_eq!(r.status, CheckStatus::Fail(FailureClass::Storage));
    }

    #[tokio::test]
    async fn config_failure_wins_over_later_classes() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = cfg_in(dir.path());
        cfg.bot_token = String::new();
        let fake = Arc::new(FakeMessenger::default());
        fake.fail_probe("Unauthorized");

        let report = HealthCheck::new(&cfg)
            .with_status_source(Arc::new(FixedSource(false)))
            .with_messenger(fake)
            .run()
            .await;

        assert_eq!(
            report.get("status_page").unwrap().status,
            CheckStatus::Fail(FailureClass::StatusSource)
        );
        assert_eq!(
            report.get("telegram").unwrap().status,
            CheckStatus::Fail(FailureClass::Messaging)
        );
        assert_eq!(report.exit_code(), 2);
    }

    #[tokio::test]
    async fn network_checks_map_to_their_codes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_in(dir.path());

        let report = HealthCheck::new(&cfg)
            .with_status_source(Arc::new(FixedSource(false)))
            .with_messenger(Arc::new(FakeMessenger::default()))
            .run()
            .await;
        assert_eq!(report.exit_code(), 4);

        let fake = Arc::new(FakeMessenger::default());
        fake.fail_probe("Unauthorized");
        let report = HealthCheck::new(&cfg)
            .with_status_source(Arc::new(FixedSource(true)))
            .with_messenger(fake)
            .run()
            .await;
        assert_eq!(report.exit_code(), 5);
        assert!(report.to_html().contains("❌ <b>telegram</b>"));
    }

    #[tokio::test]
    async fn log_tail_counts_recent_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.log");
        let mut body = String::new();
        for i in 0..30 {
            body.push_str(&format!("2025-01-01 INFO line {i}\n"));
        }
        body.push_str("2025-01-01 ERROR boom\n2025-01-01 WARN meh\n");
        std::fs::write(&path, body).unwrap();

        let tail = read_tail(&path, LOG_TAIL_LINES).await.unwrap();
        assert_eq!(tail.len(), LOG_TAIL_LINES);
        assert_eq!(tail.last().unwrap(), "2025-01-01 WARN meh");

        let r = check_log_tail(Some(&path)).await;
        assert_eq!(r.status, CheckStatus::Warn);
        assert!(r.detail.contains("1 error(s), 1 warning(s)"), "{}", r.detail);

        assert_eq!(check_log_tail(None).await.status, CheckStatus::Ok);
    }
}
