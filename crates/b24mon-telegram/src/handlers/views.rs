//! Read-only screens shared by slash commands and menu buttons.
//!
//! The pure `*_text` builders take plain data so they can be tested without a
//! bot; [`render`] gathers that data from [`AppState`].

use std::path::Path;

use chrono::{DateTime, Utc};

use b24mon_core::{
    config::Config,
    dedup::DedupStats,
    domain::{ChatId, MessageRef},
    formatting::{escape_html, msk_clock, msk_datetime, status_report, to_msk},
    health::{read_tail, HealthCheck, HealthReport},
    incidents::Incident,
    messaging::types::InlineKeyboard,
    metrics::Metrics,
    monitor::MonitorHealth,
};

use crate::router::AppState;

use super::menu;

pub const LOG_LINES: usize = 15;
/// Leaves headroom under Telegram's 4096 limit for markup added around a chunk.
pub const SAFE_MESSAGE_LEN: usize = 4000;
const LOG_BODY_MAX: usize = 3500;

/// A rendered screen: HTML body plus optional buttons.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub html: String,
    pub keyboard: Option<InlineKeyboard>,
}

impl Reply {
    pub fn text(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(html: impl Into<String>, keyboard: InlineKeyboard) -> Self {
        Self {
            html: html.into(),
            keyboard: Some(keyboard),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Status,
    Stats,
    Metrics,
    Incidents,
    History,
    Health,
    Logs,
    DataInfo,
}

pub async fn render(state: &AppState, view: View) -> Reply {
    let now = Utc::now();
    match view {
        View::Status => {
            let snap = state.status.fetch().await;
            Reply::with_keyboard(
                status_report(&snap, state.status.url(), now),
                menu::quick_actions(),
            )
        }
        View::Stats => {
            let subscribers = state.store.count().await;
            let dedup = state.dedup.stats().await;
            Reply::with_keyboard(
                stats_text(&state.cfg, subscribers, &dedup),
                menu::quick_actions(),
            )
        }
        View::Metrics => {
            let m = state.metrics.snapshot().await;
            let subscribers = state.store.count().await;
            Reply::with_keyboard(
                metrics_text(&m, &state.metrics.uptime_formatted(), subscribers),
                menu::quick_actions(),
            )
        }
        View::Incidents => {
            let active = state.incidents.active_incident().await;
            let recent = state.incidents.recent(5).await;
            let total = state.incidents.count().await;
            Reply::with_keyboard(
                incidents_text(active.as_ref(), &recent, total),
                menu::quick_actions(),
            )
        }
        View::History => {
            let resolved = state.incidents.history(5).await;
            Reply::with_keyboard(history_text(&resolved), menu::quick_actions())
        }
        View::Health => {
            let report = HealthCheck::new(&state.cfg)
                .with_status_source(state.status.clone())
                .with_messenger(state.messenger.clone())
                .run()
                .await;
            let monitor = state.monitor.health().await;
            let errors_last_hour = state.metrics.snapshot().await.errors_last_hour;
            Reply::with_keyboard(
                health_text(&report, &monitor, errors_last_hour),
                menu::quick_actions(),
            )
        }
        View::Logs => Reply::with_keyboard(
            logs_text(state.cfg.log_file.as_deref()).await,
            menu::quick_actions(),
        ),
        View::DataInfo => {
            let files = [
                ("Подписчики", state.cfg.subscribers_file.as_path()),
                ("Инциденты", state.cfg.incidents_file.as_path()),
                ("Метрики", state.cfg.metrics_file.as_path()),
            ];
            let mut sizes = Vec::with_capacity(files.len());
            for (label, path) in files {
                let size = tokio::fs::metadata(path).await.ok().map(|m| m.len());
                sizes.push((label, size));
            }
            let latest = state.incidents.latest().await;
            Reply::with_keyboard(
                data_info_text(
                    state.incidents.count().await,
                    state.store.count().await,
                    latest.as_ref(),
                    &sizes,
                ),
                menu::quick_actions(),
            )
        }
    }
}

pub fn stats_text(cfg: &Config, subscribers: usize, dedup: &DedupStats) -> String {
    format!(
        "📊 <b>Статистика бота</b>\n\n\
👥 Подписчиков: <code>{subscribers}</code>\n\
📢 Групп для алертов: <code>{}</code>\n\
⏰ Интервал проверки: <code>{}</code> сек\n\
🩺 Интервал самопроверки: <code>{}</code> сек\n\
🛡️ Подавлено дубликатов: <code>{}</code>\n\
🕐 Окно дедупликации: <code>{}</code> сек\n\
📦 Интервал группировки: <code>{}</code> сек\n\
🌐 Мониторинг: <a href=\"{}\">{}</a>",
        cfg.alert_groups.len(),
        cfg.check_interval.as_secs(),
        cfg.health_check_interval.as_secs(),
        dedup.duplicates_prevented,
        dedup.window.as_secs(),
        dedup.group_interval.as_secs(),
        escape_html(&cfg.status_url),
        escape_html(display_host(&cfg.status_url)),
    )
}

fn display_host(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    rest.split('/').next().unwrap_or(rest)
}

pub fn metrics_text(m: &Metrics, uptime: &str, subscribers: usize) -> String {
    let last_check = m
        .last_check_time
        .map(msk_clock)
        .unwrap_or_else(|| "Никогда".to_string());
    let avg_parse = if m.average_parse_time > 0.0 {
        format!("{:.2}", m.average_parse_time)
    } else {
        "N/A".to_string()
    };
    format!(
        "📊 <b>Подробные метрики бота</b>\n\n\
⏱️ <b>Время работы:</b> <code>{uptime}</code>\n\
🚨 <b>Алертов отправлено:</b> <code>{}</code>\n\
✅ <b>Восстановлений:</b> <code>{}</code>\n\
🔍 <b>Всего проверок:</b> <code>{}</code>\n\
✅ <b>Успешных:</b> <code>{}</code> ({:.1}%)\n\
❌ <b>Ошибок:</b> <code>{}</code>\n\
⏰ <b>Последняя проверка:</b> <code>{last_check}</code>\n\
⚡ <b>Среднее время парсинга:</b> <code>{avg_parse}</code> сек\n\
⚠️ <b>Ошибок за час:</b> <code>{}</code>\n\
👥 <b>Подписчиков:</b> <code>{subscribers}</code>",
        m.alerts_sent,
        m.recoveries_sent,
        m.total_checks,
        m.successful_checks,
        m.success_rate(),
        m.failed_checks,
        m.errors_last_hour,
    )
}

fn push_region_and_components(out: &mut String, inc: &Incident) {
    if !inc.region.is_empty() {
        out.push_str(&format!("🌍 Регион: <code>{}</code>\n", escape_html(&inc.region)));
    }
    if !inc.components.is_empty() {
        out.push_str(&format!(
            "🔧 Компоненты: <code>{}</code>\n",
            escape_html(&inc.components.join(", "))
        ));
    }
}

pub fn incidents_text(active: Option<&Incident>, recent: &[Incident], total: usize) -> String {
    if active.is_none() && recent.is_empty() {
        return "📋 <b>История инцидентов</b>\n\nНет зарегистрированных инцидентов.".to_string();
    }

    let mut out = String::from("📋 <b>Последние инциденты:</b>\n\n");
    if let Some(inc) = active {
        out.push_str("🔴 <b>АКТИВНЫЙ ИНЦИДЕНТ</b>\n");
        out.push_str(&format!(
            "⏰ Начало: <code>{}</code>\n",
            msk_datetime(inc.start_time)
        ));
        push_region_and_components(&mut out, inc);
        out.push('\n');
    }

    for inc in recent.iter().filter(|i| !i.is_active()) {
        out.push_str(&format!(
            "• <code>{}</code>",
            to_msk(inc.start_time).format("%d.%m %H:%M")
        ));
        if let Some(end) = inc.end_time {
            out.push_str(&format!(" - <code>{}</code>", to_msk(end).format("%H:%M")));
            if let Some(d) = &inc.duration {
                out.push_str(&format!(" (<code>{d}</code>)"));
            }
        }
        out.push('\n');
    }

    out.push_str(&format!("\n📊 Всего инцидентов: <code>{total}</code>"));
    out
}

pub fn history_text(resolved: &[Incident]) -> String {
    if resolved.is_empty() {
        return "📋 <b>История инцидентов</b>\n\nНет завершённых инцидентов.".to_string();
    }

    let mut out = format!("📋 <b>Последние {} инцидентов:</b>\n\n", resolved.len());
    for inc in resolved {
        out.push_str(&format!("🔴 <b>Инцидент #{}</b>\n", inc.id));
        out.push_str(&format!(
            "⏰ Начало: <code>{}</code>\n",
            msk_datetime(inc.start_time)
        ));
        if let Some(end) = inc.end_time {
            out.push_str(&format!("✅ Конец: <code>{}</code>\n", msk_datetime(end)));
            out.push_str(&format!(
                "⏱️ Длительность: <code>{}</code>\n",
                inc.duration.as_deref().unwrap_or("N/A")
            ));
        }
        push_region_and_components(&mut out, inc);
        out.push('\n');
    }
    out.trim_end().to_string()
}

pub fn health_text(report: &HealthReport, monitor: &MonitorHealth, errors_last_hour: usize) -> String {
    let last_ok = monitor
        .last_successful_check
        .map(msk_datetime)
        .unwrap_or_else(|| "Никогда".to_string());
    let mut out = report.to_html();
    out.push_str(&format!(
        "\n🔔 <b>Мониторинг:</b> {}\n\
✅ <b>Последняя успешная проверка:</b> <code>{last_ok}</code>\n\
⚠️ <b>Ошибок за час:</b> <code>{errors_last_hour}</code>\n\
🔄 <b>Ошибок подряд:</b> <code>{}</code>",
        if monitor.enabled {
            "✅ Включен"
        } else {
            "❌ Выключен"
        },
        monitor.consecutive_errors,
    ));
    if let Some(err) = &monitor.last_error {
        out.push_str(&format!(
            "\n📝 <b>Последняя ошибка:</b> <code>{}</code>",
            escape_html(err)
        ));
    }
    if let Some(since) = monitor.outage_since {
        out.push_str(&format!(
            "\n🔴 <b>Сбой с:</b> <code>{}</code>",
            msk_datetime(since)
        ));
    }
    out
}

pub async fn logs_text(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return "📋 <b>Логи</b>\n\nЗапись логов в файл отключена.".to_string();
    };
    match read_tail(path, LOG_LINES).await {
        Ok(lines) => format_log_lines(&lines),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => format!(
            "❌ Файл логов не найден: <code>{}</code>",
            escape_html(&path.display().to_string())
        ),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to read log tail");
            format!(
                "❌ Ошибка чтения файла логов: <code>{}</code>",
                escape_html(&e.to_string())
            )
        }
    }
}

pub fn format_log_lines(lines: &[String]) -> String {
    let body = lines.join("\n");
    let body = body.trim();
    if body.is_empty() {
        return "📋 <b>Логи</b>\n\nФайл логов пуст.".to_string();
    }
    let body = if body.len() > LOG_BODY_MAX {
        let mut cut = body.len() - LOG_BODY_MAX;
        while !body.is_char_boundary(cut) {
            cut += 1;
        }
        format!("...\n{}", &body[cut..])
    } else {
        body.to_string()
    };
    format!(
        "📋 <b>Последние {LOG_LINES} строк логов</b>\n\n<pre>{}</pre>",
        escape_html(&body)
    )
}

pub fn data_info_text(
    incidents: usize,
    subscribers: usize,
    latest: Option<&Incident>,
    sizes: &[(&str, Option<u64>)],
) -> String {
    let last = latest
        .map(|i| msk_datetime(i.start_time))
        .unwrap_or_else(|| "Нет инцидентов".to_string());
    let mut out = format!(
        "🔧 <b>Информация о данных</b>\n\n\
📊 <b>Количество инцидентов:</b> <code>{incidents}</code>\n\
👥 <b>Количество подписчиков:</b> <code>{subscribers}</code>\n\
📅 <b>Последний инцидент:</b> <code>{last}</code>\n"
    );
    for (label, size) in sizes {
        let size = match size {
            Some(bytes) => format!("{:.2} КБ", *bytes as f64 / 1024.0),
            None => "файл не найден".to_string(),
        };
        out.push_str(&format!("💾 {label}: <code>{size}</code>\n"));
    }
    out.trim_end().to_string()
}

pub fn getid_text(chat_id: i64, kind: &str, title: &str, is_supergroup: bool) -> String {
    let note = if is_supergroup {
        "\n\n⚠️ <b>Важно:</b> это супергруппа. Если группа была преобразована из обычной, используйте этот новый ID."
    } else {
        ""
    };
    format!(
        "📊 <b>Информация о чате:</b>\n\n\
🆔 <b>ID:</b> <code>{chat_id}</code>\n\
📝 <b>Тип:</b> <code>{}</code>\n\
🏷️ <b>Название:</b> <code>{}</code>{note}\n\n\
💡 Скопируйте ID и укажите его в <code>GROUP_ID</code> в файле <code>.env</code>",
        escape_html(kind),
        escape_html(title),
    )
}

/// `bitrix24_incidents_YYYYmmdd_HHMMSS.csv`, Moscow time.
pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!(
        "bitrix24_incidents_{}.csv",
        to_msk(now).format("%Y%m%d_%H%M%S")
    )
}

/// Pack newline-separated blocks into chunks of at most `limit` bytes.
///
/// Lines are never split unless a single line exceeds `limit` on its own;
/// such a line is cut at a char boundary.
pub fn split_html_blocks(html: &str, limit: usize) -> Vec<String> {
    if html.len() <= limit {
        return vec![html.to_string()];
    }

    let mut out = Vec::new();
    let mut chunk = String::new();
    for line in html.split('\n') {
        let extra = if chunk.is_empty() { 0 } else { 1 };
        if chunk.len() + extra + line.len() <= limit {
            if extra == 1 {
                chunk.push('\n');
            }
            chunk.push_str(line);
            continue;
        }

        if !chunk.is_empty() {
            out.push(std::mem::take(&mut chunk));
        }
        let mut rest = line;
        while rest.len() > limit {
            let mut cut = limit;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            out.push(rest[..cut].to_string());
            rest = &rest[cut..];
        }
        chunk.push_str(rest);
    }
    if !chunk.trim().is_empty() {
        out.push(chunk);
    }
    out
}

/// Send `reply` as one or more messages; buttons go on the last one.
pub async fn send_reply(state: &AppState, chat_id: ChatId, reply: Reply) {
    let mut chunks = split_html_blocks(&reply.html, SAFE_MESSAGE_LEN);
    let last = chunks.pop().unwrap_or_default();
    for chunk in &chunks {
        if let Err(e) = state.messenger.send_html(chat_id, chunk).await {
            tracing::warn!(chat_id = chat_id.0, error = %e, "failed to send reply chunk");
            return;
        }
    }

    let res = match reply.keyboard {
        Some(kb) => state
            .messenger
            .send_inline_keyboard(chat_id, &last, kb)
            .await
            .map(|_| ()),
        None => state.messenger.send_html(chat_id, &last).await.map(|_| ()),
    };
    if let Err(e) = res {
        tracing::warn!(chat_id = chat_id.0, error = %e, "failed to send reply");
    }
}

/// Replace a menu message in place, falling back to a fresh message when the
/// original is gone, too old, or the reply does not fit in one message.
pub async fn edit_or_send(state: &AppState, msg: MessageRef, reply: Reply) {
    if reply.html.len() <= SAFE_MESSAGE_LEN {
        let res = match &reply.keyboard {
            Some(kb) => {
                state
                    .messenger
                    .edit_inline_keyboard(msg, &reply.html, kb.clone())
                    .await
            }
            None => state.messenger.edit_html(msg, &reply.html).await,
        };
        match res {
            Ok(()) => return,
            Err(e) => {
                tracing::debug!(chat_id = msg.chat_id.0, error = %e, "edit failed, sending a new message")
            }
        }
    }
    send_reply(state, msg.chat_id, reply).await;
}
