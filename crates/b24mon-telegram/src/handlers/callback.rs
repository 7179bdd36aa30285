use std::sync::Arc;

use teloxide::prelude::*;

use b24mon_core::domain::{ChatId, MessageId, MessageRef};

use crate::router::AppState;

use super::{
    commands, menu,
    views::{edit_or_send, render, Reply, View},
};

/// What a button press asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Action {
    MainMenu,
    MonitoringMenu,
    SubscribeMenu,
    AnalyticsMenu,
    AdminMenu,
    HelpMenu,
    CloseMenu,
    Show(View),
    Subscribe,
    Unsubscribe,
    Export,
    HowTo,
    About,
}

impl Action {
    pub(crate) fn parse(data: &str) -> Option<Self> {
        let action = match data {
            "menu_main" => Action::MainMenu,
            "menu_monitoring" => Action::MonitoringMenu,
            "menu_subscribe" => Action::SubscribeMenu,
            "menu_analytics" => Action::AnalyticsMenu,
            "menu_admin" => Action::AdminMenu,
            "menu_help" => Action::HelpMenu,
            "close_menu" => Action::CloseMenu,
            // `check_status`/`show_incidents` are attached to alert messages.
            "cmd_status" | "check_status" => Action::Show(View::Status),
            "cmd_incidents" | "show_incidents" => Action::Show(View::Incidents),
            "cmd_stats" => Action::Show(View::Stats),
            "cmd_metrics" => Action::Show(View::Metrics),
            "cmd_history" => Action::Show(View::History),
            "cmd_health" | "cmd_check_conn" => Action::Show(View::Health),
            "cmd_logs" => Action::Show(View::Logs),
            "cmd_db_info" => Action::Show(View::DataInfo),
            "cmd_subscribe" => Action::Subscribe,
            "cmd_unsubscribe" => Action::Unsubscribe,
            "cmd_export" => Action::Export,
            "help_how_to" => Action::HowTo,
            "help_about" => Action::About,
            _ => return None,
        };
        Some(action)
    }

    pub(crate) fn admin_only(self) -> bool {
        matches!(
            self,
            Action::AdminMenu | Action::Show(View::Logs) | Action::Show(View::DataInfo)
        )
    }

    /// Short toast shown while a slow action runs.
    fn progress_text(self) -> Option<&'static str> {
        match self {
            Action::Show(View::Status) => Some("🔍 Проверяю статус Битрикс24..."),
            Action::Show(View::Health) => Some("🧪 Проверяю подключения..."),
            Action::Show(View::Logs) => Some("📋 Загружаю логи..."),
            Action::Export => Some("📤 Готовлю CSV..."),
            _ => None,
        }
    }
}

async fn answer_quietly(state: &AppState, callback_id: &str, text: Option<&str>) {
    if let Err(e) = state.messenger.answer_callback_query(callback_id, text).await {
        tracing::debug!(error = %e, "failed to answer callback query");
    }
}

pub async fn handle_callback(
    _bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let data = q.data.clone().unwrap_or_default();
    let Some(message) = q.message.as_ref() else {
        answer_quietly(&state, &cb_id, None).await;
        return Ok(());
    };

    let chat_id = ChatId(message.chat.id.0);
    let msg_ref = MessageRef {
        chat_id,
        message_id: MessageId(message.id.0),
    };
    let is_admin = commands::has_admin_rights(&state.cfg, chat_id.0, Some(q.from.id.0 as i64));

    let Some(action) = Action::parse(&data) else {
        tracing::debug!(data = %data, "unknown callback data");
        answer_quietly(&state, &cb_id, None).await;
        return Ok(());
    };

    if action.admin_only() && !is_admin {
        answer_quietly(&state, &cb_id, Some("❌ У вас нет доступа")).await;
        return Ok(());
    }

    // Answer right away so the client stops spinning.
    answer_quietly(&state, &cb_id, action.progress_text()).await;

    match action {
        Action::MainMenu => {
            edit_or_send(
                &state,
                msg_ref,
                Reply::with_keyboard(menu::MAIN_MENU_TEXT, menu::main_menu(is_admin)),
            )
            .await
        }
        Action::MonitoringMenu => {
            edit_or_send(
                &state,
                msg_ref,
                Reply::with_keyboard(menu::MONITORING_MENU_TEXT, menu::monitoring_menu()),
            )
            .await
        }
        Action::SubscribeMenu => {
            let subscribed = state.store.is_subscribed(chat_id).await;
            edit_or_send(
                &state,
                msg_ref,
                Reply::with_keyboard(
                    menu::subscribe_menu_text(subscribed),
                    menu::subscribe_menu(subscribed),
                ),
            )
            .await
        }
        Action::AnalyticsMenu => {
            edit_or_send(
                &state,
                msg_ref,
                Reply::with_keyboard(menu::ANALYTICS_MENU_TEXT, menu::analytics_menu()),
            )
            .await
        }
        Action::AdminMenu => {
            edit_or_send(
                &state,
                msg_ref,
                Reply::with_keyboard(menu::ADMIN_MENU_TEXT, menu::admin_menu()),
            )
            .await
        }
        Action::HelpMenu => {
            edit_or_send(
                &state,
                msg_ref,
                Reply::with_keyboard(menu::HELP_MENU_TEXT, menu::help_menu()),
            )
            .await
        }
        Action::HowTo => {
            edit_or_send(
                &state,
                msg_ref,
                Reply::with_keyboard(menu::HOW_TO_TEXT, menu::help_menu()),
            )
            .await
        }
        Action::About => {
            edit_or_send(
                &state,
                msg_ref,
                Reply::with_keyboard(menu::ABOUT_TEXT, menu::help_menu()),
            )
            .await
        }
        Action::CloseMenu => {
            if let Err(e) = state.messenger.delete_message(msg_ref).await {
                tracing::debug!(chat_id = chat_id.0, error = %e, "failed to delete menu");
            }
        }
        Action::Show(view) => {
            let reply = render(&state, view).await;
            edit_or_send(&state, msg_ref, reply).await
        }
        Action::Subscribe | Action::Unsubscribe => {
            let note = if action == Action::Subscribe {
                commands::subscribe(&state, chat_id, Some(&message.chat)).await
            } else {
                commands::unsubscribe(&state, chat_id).await
            };
            let subscribed = state.store.is_subscribed(chat_id).await;
            let body = format!("{note}\n\n{}", menu::subscribe_menu_text(subscribed));
            edit_or_send(
                &state,
                msg_ref,
                Reply::with_keyboard(body, menu::subscribe_menu(subscribed)),
            )
            .await
        }
        Action::Export => commands::send_export(&state, chat_id).await,
    }

    Ok(())
}
