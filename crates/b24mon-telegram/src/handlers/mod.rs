//! Telegram update handlers.
//!
//! Commands and inline menu buttons share the screens in [`views`]: commands
//! send a new message, buttons edit the menu message in place.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use crate::router::AppState;

mod callback;
mod commands;
pub mod menu;
pub mod views;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    match msg.text() {
        Some(text) if text.starts_with('/') => commands::handle_command(bot, msg, state).await,
        // Plain chatter (including group traffic) is ignored.
        _ => Ok(()),
    }
}
