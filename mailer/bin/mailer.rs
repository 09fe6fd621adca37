//! Command-line front end for the mailer service
//!
//! - `send` delivers a single message and waits for the outcome
//! - `serve` accepts newline-delimited JSON requests on stdin
//! - `check-config` prints the effective configuration

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use clap::{Parser, Subcommand};
use mailer::{MailerConfig, SendRequest, serve};
use mailer_common::{Signal, internal, logging, tracing};
use mailer_dispatch::{
    DeliveryObserver, DeliveryReport, Dispatcher, Message, SmtpTransport,
};
use tokio::{io::BufReader, sync::broadcast};

/// Send email through an authenticated SMTP relay
#[derive(Parser, Debug)]
#[command(name = "mailer")]
#[command(about = "Send email through an authenticated SMTP relay", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a RON config file (defaults to `MAILER_CONFIG`, then
    /// ./mailer.config.ron, then /etc/mailer/mailer.config.ron)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one message and wait until it is delivered or given up on
    Send {
        /// Recipient address
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "")]
        subject: String,
        /// HTML body
        #[arg(long, default_value = "")]
        body: String,
        /// Display name shown next to the sender address
        #[arg(long)]
        sender_name: Option<String>,
    },
    /// Read JSON send requests from stdin, one per line
    Serve,
    /// Print the effective configuration with secrets redacted
    CheckConfig,
}

/// Counts failed deliveries for the exit status.
#[derive(Default)]
struct FailureCount(AtomicUsize);

impl DeliveryObserver for FailureCount {
    fn on_complete(&self, report: &DeliveryReport) {
        if !report.is_delivered() {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn start(config: &MailerConfig, observer: Arc<FailureCount>) -> anyhow::Result<Dispatcher> {
    let transport = Arc::new(SmtpTransport::new(config.smtp.clone()));
    Ok(Dispatcher::start_with_observer(
        config.dispatch.clone(),
        transport,
        observer,
    )?)
}

async fn send(config: MailerConfig, request: SendRequest) -> anyhow::Result<()> {
    let message = Message::try_from(request)?;
    let failures = Arc::new(FailureCount::default());
    let dispatcher = start(&config, Arc::clone(&failures))?;

    let id = dispatcher.submit(message).await?;
    internal!(level = INFO, job_id = %id, "Message queued");

    dispatcher.shutdown().await?;

    if failures.0.load(Ordering::Relaxed) > 0 {
        anyhow::bail!("Message {id} could not be delivered");
    }

    Ok(())
}

/// Resolves on CTRL+C or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

async fn run_server(config: MailerConfig) -> anyhow::Result<()> {
    let failures = Arc::new(FailureCount::default());
    let dispatcher = start(&config, Arc::clone(&failures))?;
    let (sender, receiver) = broadcast::channel(4);
    // Held for the whole run so `interrupt` below never sees a closed channel
    let signals = sender.clone();

    // Every CTRL+C or SIGTERM is forwarded: the first stops intake, one
    // arriving while the queue drains cancels the drain
    let watcher = tokio::spawn(async move {
        loop {
            if let Err(err) = shutdown_signal().await {
                tracing::error!(error = %err, "Unable to listen for shutdown signals");
                break;
            }
            let _ = sender.send(Signal::Shutdown);
        }
    });

    internal!(level = INFO, "Reading send requests from stdin");
    let summary = serve::serve(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        &dispatcher.submitter(),
        receiver,
    )
    .await?;
    let mut interrupt = signals.subscribe();

    internal!(
        level = INFO,
        accepted = summary.accepted,
        rejected = summary.rejected,
        queued = dispatcher.queued(),
        "Draining queue, signal again to cancel"
    );

    let drained = dispatcher
        .shutdown_or_cancel(async move {
            let _ = interrupt.recv().await;
        })
        .await;
    watcher.abort();
    drained?;

    internal!(
        level = INFO,
        failed = failures.0.load(Ordering::Relaxed),
        "Shut down"
    );

    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = MailerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Send {
            to,
            subject,
            body,
            sender_name,
        } => {
            send(
                config,
                SendRequest {
                    to,
                    subject,
                    body,
                    sender_display_name: sender_name,
                },
            )
            .await
        }
        Commands::Serve => run_server(config).await,
        Commands::CheckConfig => {
            let pretty = ron::ser::PrettyConfig::new();
            println!("{}", ron::ser::to_string_pretty(&config.redacted(), pretty)?);
            Ok(())
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(run(cli));

    // A blocked stdin read must not hold up exit
    runtime.shutdown_background();

    result
}
