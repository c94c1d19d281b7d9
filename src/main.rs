use std::sync::Arc;

use anyhow::Context;
use channel_watch::bootstrap;
use channel_watch::channels::TelegramSource;
use channel_watch::config::WatchConfig;
use channel_watch::notify::{EmailTopicNotifier, SmtpMailer};
use channel_watch::pipeline::PipelineController;
use channel_watch::scheduler::{self, PassRunner};
use channel_watch::store::LibSqlStore;
use channel_watch::telemetry;
use channel_watch::translate::HttpTranslator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let run_once = std::env::args().skip(1).any(|arg| arg == "--once");

    let config = WatchConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  Set CHANNEL_ID, PATTERN, SUB_PATTERN, EMAIL and the SMTP_* variables.");
        std::process::exit(2);
    });

    let _log_guard = telemetry::init(config.runtime.log_dir.as_deref());

    eprintln!("📡 channel-watch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Channel: {}", config.feed.channel_id);
    eprintln!(
        "   Translate: {} → {} via {}",
        config.translation.source_lang, config.translation.target_lang, config.translation.base_url
    );
    eprintln!("   Topic: {}", config.notification.topic);
    eprintln!("   Database: {}", config.runtime.db_path.display());
    if run_once {
        eprintln!("   Mode: single pass\n");
    } else {
        eprintln!("   Schedule: {}\n", config.runtime.schedule);
    }

    // ── Shared clients ──────────────────────────────────────────────────
    let http = reqwest::Client::builder()
        .timeout(config.runtime.http_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    // ── Database ────────────────────────────────────────────────────────
    let store = Arc::new(
        LibSqlStore::new_local(&config.runtime.db_path)
            .await
            .with_context(|| {
                format!("Failed to open database at {}", config.runtime.db_path.display())
            })?,
    );

    // ── Notification topic ──────────────────────────────────────────────
    let mailer = Arc::new(SmtpMailer::new(&config.notification.smtp)?);
    let notifier = Arc::new(EmailTopicNotifier::new(
        config.notification.topic.clone(),
        store.clone(),
        mailer,
    ));
    bootstrap::ensure_recipient(notifier.as_ref(), &config.notification.recipient).await?;

    // ── Pipeline ────────────────────────────────────────────────────────
    let controller = Arc::new(PipelineController::new(
        store.clone(),
        Arc::new(TelegramSource::new(&config.feed, http.clone())),
        Arc::new(HttpTranslator::new(&config.translation, http)),
        notifier,
        config.pattern_filter()?,
        config.pipeline(),
    ));
    let runner = Arc::new(PassRunner::new(
        controller,
        store,
        config.feed.channel_id.clone(),
        config.runtime.lease_ttl,
    ));

    if run_once {
        let report = runner.run_once().await;
        println!("{}", serde_json::to_string(&report)?);
        if report.status.is_failure() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let handle = scheduler::spawn_schedule(runner, &config.runtime.schedule)?;
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    handle.abort();
    Ok(())
}
