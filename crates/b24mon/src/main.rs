use std::sync::Arc;

use b24mon_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), b24mon_core::Error> {
    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("b24mon: {e}");
            std::process::exit(2);
        }
    };

    let _guard = b24mon_core::logging::init("b24mon", &cfg.log_level, cfg.log_file.as_deref())?;
    tracing::info!(token = %cfg.redacted_token(), url = %cfg.status_url, "configuration loaded");

    b24mon_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| b24mon_core::Error::External(format!("telegram bot failed: {e:#}")))?;

    Ok(())
}
