use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use vmbackup::clock::SystemClock;
use vmbackup::config::{AppConfig, LogSettings, RunConfig};
use vmbackup::notify::{NotificationSink, NullNotifier, WebhookNotifier};
use vmbackup::orchestrator::BackupOrchestrator;
use vmbackup::platform::{PlatformGateway, RestGateway};

#[derive(Parser)]
#[command(name = "vmbackup")]
#[command(about = "Automated VM backups: snapshot, clone, export, retire")]
struct Cli {
    /// Path to the per-run config file, pass dash (-) for stdin
    #[arg(short = 'c', long = "config-file")]
    config_file: String,
}

fn init_logging(settings: &LogSettings) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(&settings.directory, "vmbackup.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::try_new(&settings.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file_writer.and(std::io::stderr))
        .with_ansi(false)
        .init();

    guard
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app = AppConfig::load_default().context("loading application config")?;
    let _log_guard = init_logging(&app.logging);

    let run_config = match RunConfig::load(&cli.config_file) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return Err(err.into());
        }
    };

    let notifier: Arc<dyn NotificationSink> = if app.notify.webhook_url.is_empty() {
        Arc::new(NullNotifier)
    } else {
        Arc::new(WebhookNotifier::new(&app.notify.webhook_url, "VM Backup"))
    };

    let platform: Arc<dyn PlatformGateway> = match RestGateway::connect(&app.api) {
        Ok(gateway) => Arc::new(gateway),
        Err(err) => {
            error!("{}", err);
            notifier.notify(&err.to_string()).await;
            return Err(err.into());
        }
    };

    let orchestrator = BackupOrchestrator::new(
        platform.clone(),
        Arc::new(SystemClock),
        notifier.clone(),
        run_config,
    );

    // pre-flight failures are fatal; the session is still released
    if let Err(err) = orchestrator.check_config_integrity().await {
        error!("{}", err);
        notifier.notify(&err.to_string()).await;
        let _ = platform.close().await;
        return Err(err.into());
    }

    let outcome = orchestrator.run().await;
    let _ = platform.close().await;

    outcome.map_err(Into::into)
}
