use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use teloxide::{prelude::*, types::Chat};

use b24mon_core::{config::Config, domain::ChatId, formatting::escape_html};

use crate::router::AppState;

use super::{
    menu,
    views::{self, render, send_reply, Reply, View},
};

pub(crate) fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// The admin may act from their private chat or, inside a group, as the sender.
pub(crate) fn has_admin_rights(cfg: &Config, chat_id: i64, sender: Option<i64>) -> bool {
    cfg.is_admin(chat_id) || sender.is_some_and(|id| cfg.is_admin(id))
}

/// `/monitoring off` (or `выкл`/`stop`) disables; anything else enables.
pub(crate) fn monitoring_arg_enables(arg: &str) -> bool {
    let arg = arg.to_lowercase();
    !["off", "выкл", "stop"].iter().any(|w| arg.contains(w))
}

pub(crate) fn chat_kind(chat: &Chat) -> &'static str {
    if chat.is_private() {
        "private"
    } else if chat.is_supergroup() {
        "supergroup"
    } else if chat.is_group() {
        "group"
    } else if chat.is_channel() {
        "channel"
    } else {
        "unknown"
    }
}

fn chat_metadata(chat: &Chat) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    meta.insert("type".to_string(), chat_kind(chat).to_string());
    if let Some(title) = chat.title() {
        meta.insert("title".to_string(), title.to_string());
    }
    if let Some(username) = chat.username() {
        meta.insert("username".to_string(), username.to_string());
    }
    if let Some(name) = chat.first_name() {
        meta.insert("first_name".to_string(), name.to_string());
    }
    meta
}

pub(crate) async fn subscribe(state: &AppState, chat_id: ChatId, chat: Option<&Chat>) -> String {
    let meta = chat.map(chat_metadata).unwrap_or_default();
    match state.store.add_with_metadata(chat_id, meta).await {
        Ok(true) => "✅ Вы подписаны на уведомления о статусе Битрикс24!".to_string(),
        Ok(false) => "ℹ️ Вы уже подписаны на уведомления!".to_string(),
        Err(e) => {
            tracing::error!(chat_id = chat_id.0, error = %e, "subscribe failed");
            "❌ Не удалось сохранить подписку. Попробуйте позже.".to_string()
        }
    }
}

pub(crate) async fn unsubscribe(state: &AppState, chat_id: ChatId) -> String {
    match state.store.remove(chat_id).await {
        Ok(true) => "❌ Вы отписались от уведомлений.".to_string(),
        Ok(false) => "ℹ️ Вы не были подписаны на уведомления.".to_string(),
        Err(e) => {
            tracing::error!(chat_id = chat_id.0, error = %e, "unsubscribe failed");
            "❌ Не удалось отменить подписку. Попробуйте позже.".to_string()
        }
    }
}

/// Send the incident CSV as a document, or a note when there is nothing yet.
pub(crate) async fn send_export(state: &AppState, chat_id: ChatId) {
    if state.incidents.count().await == 0 {
        send_reply(
            state,
            chat_id,
            Reply::text("📊 <b>Экспорт данных</b>\n\nНет данных для экспорта."),
        )
        .await;
        return;
    }

    let csv = state.incidents.export_csv().await;
    let name = views::export_file_name(Utc::now());
    if let Err(e) = state
        .messenger
        .send_document(
            chat_id,
            &name,
            csv.into_bytes(),
            Some("📊 Экспорт истории инцидентов"),
        )
        .await
    {
        tracing::error!(chat_id = chat_id.0, error = %e, "csv export failed");
        send_reply(state, chat_id, Reply::text("❌ Ошибка при экспорте данных.")).await;
    }
}

const ADMIN_ONLY: &str = "❌ Команда доступна только администратору.";

pub async fn handle_command(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let chat_id = ChatId(msg.chat.id.0);
    let sender = msg.from().map(|u| u.id.0 as i64);
    let is_admin = has_admin_rights(&state.cfg, chat_id.0, sender);
    let (cmd, arg) = parse_command(text);
    tracing::debug!(chat_id = chat_id.0, cmd = %cmd, "command received");

    match cmd.as_str() {
        "start" => {
            let was_subscribed = state.store.is_subscribed(chat_id).await;
            if !was_subscribed {
                subscribe(&state, chat_id, Some(&msg.chat)).await;
            }
            let name = msg
                .from()
                .map(|u| u.first_name.clone())
                .unwrap_or_else(|| "друг".to_string());
            let body = format!(
                "👋 <b>Привет, {}!</b> Я бот для мониторинга статуса Битрикс24.\n\n\
✅ Вы {} на уведомления!\n\n\
🎯 <b>Выберите что вам нужно:</b>",
                escape_html(&name),
                if was_subscribed {
                    "подписаны"
                } else {
                    "автоматически подписаны"
                }
            );
            send_reply(&state, chat_id, Reply::with_keyboard(body, menu::main_menu(is_admin))).await;
            Ok(())
        }

        "help" => {
            let body = format!(
                "🤖 <b>Бот мониторинга статуса Битрикс24</b>\n\n{}",
                menu::COMMANDS_TEXT
            );
            send_reply(&state, chat_id, Reply::with_keyboard(body, menu::help_menu())).await;
            Ok(())
        }

        "menu" => {
            send_reply(
                &state,
                chat_id,
                Reply::with_keyboard(menu::MAIN_MENU_TEXT, menu::main_menu(is_admin)),
            )
            .await;
            Ok(())
        }

        "subscribe" => {
            let body = subscribe(&state, chat_id, Some(&msg.chat)).await;
            send_reply(&state, chat_id, Reply::text(body)).await;
            Ok(())
        }

        "unsubscribe" => {
            let body = unsubscribe(&state, chat_id).await;
            send_reply(&state, chat_id, Reply::text(body)).await;
            Ok(())
        }

        "status" => {
            if let Err(e) = state
                .messenger
                .send_html(chat_id, "🔍 Проверяю статус Битрикс24...")
                .await
            {
                tracing::debug!(chat_id = chat_id.0, error = %e, "failed to send status notice");
            }
            let reply = render(&state, View::Status).await;
            send_reply(&state, chat_id, reply).await;
            Ok(())
        }

        "stats" => {
            send_reply(&state, chat_id, render(&state, View::Stats).await).await;
            Ok(())
        }

        "metrics" => {
            send_reply(&state, chat_id, render(&state, View::Metrics).await).await;
            Ok(())
        }

        "incidents" => {
            send_reply(&state, chat_id, render(&state, View::Incidents).await).await;
            Ok(())
        }

        "history" => {
            send_reply(&state, chat_id, render(&state, View::History).await).await;
            Ok(())
        }

        "health" => {
            send_reply(&state, chat_id, render(&state, View::Health).await).await;
            Ok(())
        }

        "export" => {
            send_export(&state, chat_id).await;
            Ok(())
        }

        "getid" => {
            let title = msg.chat.title().unwrap_or("Личный чат");
            let body = views::getid_text(
                chat_id.0,
                chat_kind(&msg.chat),
                title,
                msg.chat.is_supergroup(),
            );
            tracing::info!(chat_id = chat_id.0, title, "chat id requested");
            send_reply(&state, chat_id, Reply::text(body)).await;
            Ok(())
        }

        "monitoring" => {
            if !is_admin {
                send_reply(&state, chat_id, Reply::text(ADMIN_ONLY)).await;
                return Ok(());
            }
            let enabled = monitoring_arg_enables(&arg);
            state.monitor.set_enabled(enabled);
            let body = format!(
                "🔔 Мониторинг {}.",
                if enabled { "включен" } else { "выключен" }
            );
            send_reply(&state, chat_id, Reply::text(body)).await;
            Ok(())
        }

        "logs" => {
            if !is_admin {
                send_reply(&state, chat_id, Reply::text(ADMIN_ONLY)).await;
                return Ok(());
            }
            send_reply(&state, chat_id, render(&state, View::Logs).await).await;
            Ok(())
        }

        _ => {
            let body = format!(
                "Неизвестная команда: /{}\n\nСписок команд: /help",
                escape_html(&cmd)
            );
            send_reply(&state, chat_id, Reply::text(body)).await;
            Ok(())
        }
    }
}
