//! Core domain + services for the Bitrix24 status relay bot.
//!
//! This crate is framework-agnostic. Telegram lives behind the
//! [`messaging::port::MessagingPort`] trait, implemented in the adapter crate;
//! the status page sits behind [`status::StatusSource`].

pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod health;
pub mod incidents;
pub mod logging;
pub mod messaging;
pub mod metrics;
pub mod monitor;
pub mod retry;
pub mod status;
pub mod storage;
pub mod subscribers;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
