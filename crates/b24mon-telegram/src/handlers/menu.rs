//! Inline menus and their callback identifiers.

use b24mon_core::messaging::types::{InlineButton, InlineKeyboard};

pub const MAIN_MENU_TEXT: &str = "🤖 <b>Главное меню</b>\n\nВыберите раздел:";
pub const MONITORING_MENU_TEXT: &str = "📊 <b>Мониторинг &amp; Статус</b>\n\nВыберите действие:";
pub const ANALYTICS_MENU_TEXT: &str =
    "📈 <b>Аналитика &amp; Метрики</b>\n\nВыберите что вас интересует:";
pub const ADMIN_MENU_TEXT: &str = "⚙️ <b>Администрирование</b>\n\nТолько для администраторов:";
pub const HELP_MENU_TEXT: &str = "❓ <b>Справка &amp; Помощь</b>\n\nВыберите что вас интересует:";

pub const HOW_TO_TEXT: &str = "📖 <b>Как использовать бот</b>\n\n\
1. <b>Мониторинг</b>: проверяйте статус Битрикс24 в реальном времени\n\
2. <b>Уведомления</b>: подпишитесь, чтобы получать алерты о сбоях\n\
3. <b>Метрики</b>: смотрите статистику и производительность\n\
4. <b>История</b>: просматривайте последние инциденты\n\n\
Все команды доступны через меню или текстом (/help).";

pub const ABOUT_TEXT: &str = "💬 <b>О боте</b>\n\n\
Telegram бот для мониторинга статуса Битрикс24\n\n\
<b>Функции</b>:\n\
• ✅ Автоматический мониторинг статуса\n\
• 🔔 Алерты о сбоях в реальном времени\n\
• 🛡️ Дедупликация алертов\n\
• 📊 Подробная аналитика\n\
• 💾 История инцидентов\n\
• 📤 Экспорт данных\n\
• 📋 Просмотр логов";

pub const COMMANDS_TEXT: &str = "<b>📋 Команды:</b>\n\
/status - текущий статус Битрикс24\n\
/subscribe - подписаться на уведомления\n\
/unsubscribe - отписаться\n\
/incidents - последние инциденты\n\
/history - последние 5 завершённых инцидентов\n\
/stats - статистика бота\n\
/metrics - подробные метрики\n\
/health - здоровье бота\n\
/export - экспорт инцидентов в CSV\n\
/getid - ID этого чата\n\
/menu - главное меню";

fn back() -> InlineButton {
    InlineButton::new("🔙 Назад", "menu_main")
}

pub fn main_menu(is_admin: bool) -> InlineKeyboard {
    let mut buttons = vec![
        InlineButton::new("📊 Мониторинг & Статус", "menu_monitoring"),
        InlineButton::new("🔔 Управление подписками", "menu_subscribe"),
        InlineButton::new("📈 Аналитика & Метрики", "menu_analytics"),
    ];
    if is_admin {
        buttons.push(InlineButton::new("⚙️ Администрирование", "menu_admin"));
    }
    buttons.push(InlineButton::new("❓ Справка", "menu_help"));
    buttons.push(InlineButton::new("✖️ Закрыть меню", "close_menu"));
    InlineKeyboard::one_per_row(buttons)
}

pub fn monitoring_menu() -> InlineKeyboard {
    InlineKeyboard::one_per_row(vec![
        InlineButton::new("🔄 Проверить статус сейчас", "cmd_status"),
        InlineButton::new("📋 История инцидентов", "cmd_incidents"),
        InlineButton::new("🏥 Статус здоровья бота", "cmd_health"),
        InlineButton::new("📝 Последние логи", "cmd_logs"),
        back(),
    ])
}

pub fn subscribe_menu(is_subscribed: bool) -> InlineKeyboard {
    let action = if is_subscribed {
        InlineButton::new("❌ Отписаться", "cmd_unsubscribe")
    } else {
        InlineButton::new("✅ Подписаться", "cmd_subscribe")
    };
    InlineKeyboard::one_per_row(vec![action, back()])
}

pub fn subscribe_menu_text(is_subscribed: bool) -> String {
    let status = if is_subscribed {
        "✅ Подписаны"
    } else {
        "❌ Не подписаны"
    };
    format!("🔔 <b>Управление подписками</b>\n\nВаш статус: {status}\n\nВыберите действие:")
}

pub fn analytics_menu() -> InlineKeyboard {
    InlineKeyboard::one_per_row(vec![
        InlineButton::new("📊 Базовая статистика", "cmd_stats"),
        InlineButton::new("📉 Подробные метрики", "cmd_metrics"),
        InlineButton::new("📤 Экспорт данных CSV", "cmd_export"),
        InlineButton::new("📜 Последние инциденты", "cmd_history"),
        back(),
    ])
}

pub fn admin_menu() -> InlineKeyboard {
    InlineKeyboard::one_per_row(vec![
        InlineButton::new("📋 Последние логи", "cmd_logs"),
        InlineButton::new("🔧 Информация о данных", "cmd_db_info"),
        InlineButton::new("🧪 Проверить подключения", "cmd_check_conn"),
        back(),
    ])
}

pub fn help_menu() -> InlineKeyboard {
    InlineKeyboard::one_per_row(vec![
        InlineButton::new("📖 Как использовать бот", "help_how_to"),
        InlineButton::new("💬 О боте", "help_about"),
        back(),
    ])
}

/// Two-by-two shortcut row attached under most replies.
pub fn quick_actions() -> InlineKeyboard {
    InlineKeyboard::default()
        .row(vec![
            InlineButton::new("🔄 Статус", "cmd_status"),
            InlineButton::new("📊 Метрики", "cmd_metrics"),
        ])
        .row(vec![
            InlineButton::new("📋 История", "cmd_history"),
            InlineButton::new("🏠 Меню", "menu_main"),
        ])
}
