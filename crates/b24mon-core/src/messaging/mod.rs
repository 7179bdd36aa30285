//! Outbound messaging abstractions (Telegram today, behind a port).

pub mod port;
pub mod throttled;
pub mod types;
