//! Telegram HTML rendering for status notifications, plus time helpers.
//!
//! All user-facing times are Moscow time (fixed UTC+3, no DST since 2014).

use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::{
    messaging::types::{InlineButton, InlineKeyboard},
    status::StatusSnapshot,
};

const MSK_OFFSET_SECS: i32 = 3 * 3600;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn msk_offset() -> FixedOffset {
    FixedOffset::east_opt(MSK_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

pub fn to_msk(t: DateTime<Utc>) -> DateTime<FixedOffset> {
    t.with_timezone(&msk_offset())
}

/// `HH:MM:SS` in Moscow time.
pub fn msk_clock(t: DateTime<Utc>) -> String {
    to_msk(t).format("%H:%M:%S").to_string()
}

/// `dd.mm.yyyy HH:MM:SS` in Moscow time.
pub fn msk_datetime(t: DateTime<Utc>) -> String {
    to_msk(t).format("%d.%m.%Y %H:%M:%S").to_string()
}

/// Zero-padded `HH:MM:SS`; hours grow past 24 rather than rolling into days.
pub fn format_duration_hms(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{mins:02}:{secs:02}")
}

pub fn duration_between(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format_duration_hms(end.signed_duration_since(start).num_seconds())
}

/// Uptime as `X дн., Y ч., Z мин.`; zero units are left out, but the
/// result is never empty.
pub fn format_uptime(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let mins = (seconds % 3600) / 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days} дн."));
    }
    if hours > 0 {
        parts.push(format!("{hours} ч."));
    }
    if mins > 0 || parts.is_empty() {
        parts.push(format!("{mins} мин."));
    }
    parts.join(", ")
}

/// Buttons attached to every status notification.
pub fn status_keyboard() -> InlineKeyboard {
    InlineKeyboard::default().row(vec![
        InlineButton::new("🔄 Проверить статус", "check_status"),
        InlineButton::new("📋 Инциденты", "cmd_incidents"),
    ])
}

fn footer(url: &str, now: DateTime<Utc>) -> String {
    format!(
        "🔄 <b>Обновлено:</b> <code>{}</code> (МСК)\n🔗 <a href=\"{}\">Проверить статус</a>",
        msk_clock(now),
        escape_html(url)
    )
}

/// Outage alert. `started` and `duration` are shown when known.
pub fn outage_alert(
    snap: &StatusSnapshot,
    url: &str,
    started: Option<DateTime<Utc>>,
    duration: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    let mut msg = String::from("🚨 <b>АЛЕРТ: Обнаружены проблемы!</b>\n\n🔴 <b>ВРЕМЕННЫЙ СБОЙ</b>\n");

    if !snap.region.is_empty() {
        msg.push_str(&format!(
            "🌍 <b>Регион:</b> <code>{}</code>\n",
            escape_html(&snap.region)
        ));
    }
    if !snap.components.is_empty() {
        msg.push_str(&format!(
            "🧩 <b>Компоненты:</b> {}\n",
            escape_html(&snap.components.join(", "))
        ));
    }
    if let Some(start) = started {
        msg.push_str(&format!(
            "⏰ <b>Сбой с:</b> <code>{}</code> (МСК)\n",
            msk_clock(start)
        ));
        if let Some(d) = duration {
            msg.push_str(&format!("⏱️ <b>Длится:</b> <code>{}</code>\n", escape_html(d)));
        }
    }
    msg.push('\n');

    if !snap.description.is_empty() {
        msg.push_str(&format!(
            "📝 <b>Описание проблемы:</b>\n<i>{}</i>\n\n",
            escape_html(&snap.description)
        ));
    }

    msg.push_str("⚠️ <i>Мы уже зафиксировали и решаем ситуацию.</i>\n");
    msg.push_str("⏳ <i>Пожалуйста, подождите. Скоро всё заработает.</i>\n\n");
    msg.push_str(&footer(url, now));
    msg
}

/// Recovery notice, with the outage length when known.
pub fn recovery_notice(
    region: &str,
    url: &str,
    duration: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    let mut msg = String::from("✅ <b>СЕРВИС ВОССТАНОВЛЕН!</b>\n\n✅ <b>ВСЕ РАБОТАЕТ</b>\n");
    if !region.is_empty() {
        msg.push_str(&format!(
            "🌍 <b>Регион:</b> <code>{}</code>\n",
            escape_html(region)
        ));
    }
    match duration {
        Some(d) => msg.push_str(&format!(
            "⏰ <b>Сбой длился:</b> <code>{}</code>\n✅ <b>Восстановлено:</b> <code>{}</code> (МСК)\n\n",
            escape_html(d),
            msk_clock(now)
        )),
        None => msg.push('\n'),
    }
    msg.push_str(&footer(url, now));
    msg
}

/// Plain "everything works" message.
pub fn all_ok_notice(url: &str, now: DateTime<Utc>) -> String {
    format!(
        "✅ <b>Битрикс24 работает нормально</b>\n\nВсе системы функционируют штатно.\n\n{}",
        footer(url, now)
    )
}

/// Current status for on-demand checks (`/status`, refresh button).
pub fn status_report(snap: &StatusSnapshot, url: &str, now: DateTime<Utc>) -> String {
    if snap.error {
        return format!("❌ {}", escape_html(&snap.message));
    }
    if snap.has_issues {
        return outage_alert(snap, url, None, None, now);
    }
    all_ok_notice(url, now)
}

pub fn admin_fetch_warning(consecutive_errors: u32, last_error: &str) -> String {
    format!(
        "⚠️ <b>Предупреждение:</b> бот не может получить статус Битрикс24.\n\
Ошибок подряд: <code>{consecutive_errors}</code>\n\
Последняя ошибка: <code>{}</code>",
        escape_html(last_error)
    )
}
