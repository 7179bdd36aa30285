//! Container health probe.
//!
//! Runs the bot's self-checks once and exits with the code of the most
//! fundamental failure: 0 healthy, 2 config, 3 storage, 4 status page,
//! 5 Telegram. `--offline` skips the two network checks.

use std::sync::Arc;

use clap::Parser;

use b24mon_core::{
    config::Config,
    health::HealthCheck,
    messaging::port::MessagingPort,
    status::{StatusClient, StatusSource},
};
use b24mon_telegram::TelegramMessenger;

/// Exit code for bad command-line usage (sysexits `EX_USAGE`).
const USAGE_EXIT: i32 = 64;

/// Self-check for the b24mon bot; configuration comes from the environment.
#[derive(Parser, Debug)]
#[command(name = "b24mon-check", version, long_about = None)]
struct Args {
    /// Skip the status page and Telegram checks.
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(a) => a,
        Err(e) => {
            if let Err(io) = e.print() {
                eprintln!("b24mon-check: {io}");
            }
            // Help and version go to stdout and are not failures.
            std::process::exit(if e.use_stderr() { USAGE_EXIT } else { 0 });
        }
    };

    // Validation happens in the config check.
    let cfg = Config::from_env();
    if let Err(e) = b24mon_core::logging::init("b24mon_check", &cfg.log_level, None) {
        eprintln!("b24mon-check: {e}");
    }

    let mut check = HealthCheck::new(&cfg).offline(args.offline);
    if !args.offline {
        match StatusClient::from_config(&cfg) {
            Ok(client) => {
                let source: Arc<dyn StatusSource> = Arc::new(client);
                check = check.with_status_source(source);
            }
            Err(e) => tracing::warn!(error = %e, "cannot build status client"),
        }
        if cfg.validate().is_ok() {
            let messenger: Arc<dyn MessagingPort> =
                Arc::new(TelegramMessenger::from_token(cfg.bot_token.clone()));
            check = check.with_messenger(messenger);
        }
    }

    let report = check.run().await;
    println!("{report}");
    std::process::exit(report.exit_code());
}
