//! Status page fetching and parsing.

use std::{sync::OnceLock, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, time::Instant};

use crate::{config::Config, errors::Error, retry::RetryPolicy, Result};

const OUTAGE_MARKER: &str = "ВРЕМЕННЫЙ СБОЙ";
const ALL_GOOD_MARKER: &str = "ВСЕ ОТЛИЧНО РАБОТАЕТ";
const DESCRIPTION_END: &str = "Пожалуйста, подождите";

pub const MSG_ISSUES: &str = "Обнаружен временный сбой в работе Битрикс24";
pub const MSG_OK: &str = "Все системы Битрикс24 работают нормально";
pub const MSG_FETCH_FAILED: &str = "Ошибка при получении данных с сервера статуса";

const USER_AGENT: &str = "Mozilla/5.0 (compatible; b24mon/0.1; +https://status.bitrix24.ru/)";
const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// How far (in characters) around a component keyword to look for a problem word.
const COMPONENT_CONTEXT: usize = 50;

const COMPONENT_KEYWORDS: &[(&str, &[&str])] = &[
    ("CRM", &["crm", "клиенты", "сделки"]),
    ("Почта", &["почта", "email", "mail", "письма"]),
    ("Задачи", &["задачи", "tasks", "task", "проекты"]),
    ("Диск", &["диск", "disk", "файлы", "files"]),
    ("Календарь", &["календарь", "calendar", "события"]),
    ("Телефония", &["телефония", "звонки", "calls", "видео"]),
];

const PROBLEM_WORDS: &[&str] = &["сбой", "проблем", "ошибк", "недоступен", "down"];

/// One observation of the status page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub has_issues: bool,
    pub message: String,
    /// Timestamp as printed on the page (`dd.mm.yyyy hh:mm:ss`), if any.
    pub timestamp: String,
    pub description: String,
    /// Affected region suffix such as `.ru`.
    pub region: String,
    pub components: Vec<String>,
    /// The page could not be fetched or parsed; the other fields are meaningless.
    pub error: bool,
}

impl StatusSnapshot {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        !self.error && !self.has_issues
    }

    /// `"down"` while there are issues, `"up"` otherwise.
    pub fn status_label(&self) -> &'static str {
        if self.has_issues {
            "down"
        } else {
            "up"
        }
    }
}

/// Anything the monitor can poll for a snapshot.
#[async_trait]
pub trait StatusSource: Send + Sync {
    fn url(&self) -> &str;

    /// Fetch and parse the page. Failures come back as `StatusSnapshot::failed`.
    async fn fetch(&self) -> StatusSnapshot;

    /// Quick HEAD probe of the page.
    async fn check_availability(&self) -> bool;
}

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{2}\.\d{2}\.\d{4}\s+\d{2}:\d{2}:\d{2}").expect("valid regex")
    })
}

fn region_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.(ru|com|eu|by|kz|ua)").expect("valid regex"))
}

fn alert_class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)error|warning|alert|down").expect("valid regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn all_elements() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("*").expect("valid selector"))
}

fn headings() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("valid selector"))
}

/// Parse a status page into a snapshot.
///
/// The page reports trouble with the phrase `ВРЕМЕННЫЙ СБОЙ`. When the phrase
/// is missing, elements with alert-ish CSS classes or headings mentioning a
/// failure are taken as a fallback signal. `ВСЕ ОТЛИЧНО РАБОТАЕТ` anywhere on
/// the page overrides every signal.
pub fn parse_status_page(html: &str) -> StatusSnapshot {
    let document = Html::parse_document(html);
    let page_text: String = document.root_element().text().collect();

    let all_good = page_text.contains(ALL_GOOD_MARKER);
    let mut outage = page_text.contains(OUTAGE_MARKER);

    if !outage {
        outage = document.select(all_elements()).any(|el| {
            el.value()
                .classes()
                .any(|class| alert_class_re().is_match(class))
        });
    }

    if !outage {
        outage = document.select(headings()).any(|h| {
            let text = h.text().collect::<String>().to_uppercase();
            text.contains("СБОЙ") || text.contains("ПРОБЛЕМ")
        });
    }

    if !outage || all_good {
        return StatusSnapshot {
            has_issues: false,
            message: MSG_OK.to_string(),
            ..StatusSnapshot::default()
        };
    }

    let timestamp = timestamp_re()
        .find(&page_text)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let region = region_re()
        .captures(&page_text)
        .and_then(|c| c.get(1))
        .map(|m| format!(".{}", m.as_str()))
        .unwrap_or_default();

    StatusSnapshot {
        has_issues: true,
        message: MSG_ISSUES.to_string(),
        timestamp,
        description: extract_description(&page_text),
        region,
        components: detect_components(&page_text),
        error: false,
    }
}

fn extract_description(page_text: &str) -> String {
    let Some(start) = page_text.find(OUTAGE_MARKER) else {
        return String::new();
    };
    let rest = &page_text[start + OUTAGE_MARKER.len()..];
    let body = match rest.find(DESCRIPTION_END) {
        Some(end) => &rest[..end],
        None => rest,
    };
    whitespace_re().replace_all(body.trim(), " ").into_owned()
}

/// Components whose first keyword mention has a problem word nearby.
fn detect_components(page_text: &str) -> Vec<String> {
    let lower: Vec<char> = page_text.to_lowercase().chars().collect();
    let lower_str: String = lower.iter().collect();

    let mut found = Vec::new();
    for (component, keywords) in COMPONENT_KEYWORDS {
        let hit = keywords.iter().any(|kw| {
            let Some(byte_idx) = lower_str.find(*kw) else {
                return false;
            };
            let idx = lower_str[..byte_idx].chars().count();
            let from = idx.saturating_sub(COMPONENT_CONTEXT);
            let to = (idx + COMPONENT_CONTEXT).min(lower.len());
            let context: String = lower[from..to].iter().collect();
            PROBLEM_WORDS.iter().any(|w| context.contains(*w))
        });
        if hit {
            found.push(component.to_string());
        }
    }
    found
}

/// HTTP client for the public status page, with retry and a short result cache.
pub struct StatusClient {
    http: reqwest::Client,
    url: String,
    retry: RetryPolicy,
    cache_ttl: Duration,
    cache: Mutex<Option<(Instant, StatusSnapshot)>>,
}

impl StatusClient {
    pub fn new(
        url: impl Into<String>,
        request_timeout: Duration,
        retry: RetryPolicy,
        cache_ttl: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::External(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            url: url.into(),
            retry,
            cache_ttl,
            cache: Mutex::new(None),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            cfg.status_url.clone(),
            cfg.request_timeout,
            RetryPolicy::new(cfg.retry_attempts, cfg.retry_delay),
            cfg.cache_ttl,
        )
    }

    async fn fetch_html(&self) -> Result<String> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::transient(format!("status page returned {status}")));
        }
        if !status.is_success() {
            return Err(Error::External(format!("status page returned {status}")));
        }

        resp.text().await.map_err(classify_reqwest)
    }

    async fn cached(&self) -> Option<StatusSnapshot> {
        let guard = self.cache.lock().await;
        match guard.as_ref() {
            Some((at, snap)) if at.elapsed() < self.cache_ttl => Some(snap.clone()),
            _ => None,
        }
    }
}

fn classify_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        Error::transient(format!("status page request failed: {e}"))
    } else {
        Error::External(format!("status page request failed: {e}"))
    }
}

#[async_trait]
impl StatusSource for StatusClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> StatusSnapshot {
        if let Some(snap) = self.cached().await {
            tracing::debug!("using cached status snapshot");
            return snap;
        }

        let out = self.retry.run(move |_| self.fetch_html()).await;
        let html = match out.result {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(url = %self.url, attempts = out.attempts, error = %e, "status page fetch failed");
                return StatusSnapshot::failed(MSG_FETCH_FAILED);
            }
        };

        let snap = parse_status_page(&html);
        if snap.has_issues {
            tracing::info!(components = ?snap.components, region = %snap.region, "status page reports an outage");
        } else {
            tracing::debug!("status page reports normal operation");
        }

        *self.cache.lock().await = Some((Instant::now(), snap.clone()));
        snap
    }

    async fn check_availability(&self) -> bool {
        match self
            .http
            .head(&self.url)
            .timeout(AVAILABILITY_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "status page unavailable");
                false
            }
        }
    }
}
