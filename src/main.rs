use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proxy_checker::{
    bot::TelegramBot,
    logging,
    proxy::{Check, LineSink, LineSource, VerificationEngine},
    server, CancelReason, CancelToken, Config,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How long a signalled process waits for in-flight work before exiting
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Verifies IP:PORT proxy candidates over HTTP and SOCKS5
#[derive(Parser)]
#[command(name = "proxy-checker")]
#[command(about = "Verifies IP:PORT proxy candidates over HTTP and SOCKS5")]
#[command(version)]
#[command(long_about = "
Verifies IP:PORT proxy candidates by routing a probe request through each one
and confirming the outbound IP becomes the proxy's own address.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Environment variables
3. Configuration file (--config or CONFIG_PATH)
4. Built-in defaults

Environment variables:
  ENV                 - local, dev or prod (log format)
  VERBOSE             - Enable debug logging (true/false)
  API                 - Endpoint echoing the caller's IP
  TIMEOUT             - Timeout of one probe (e.g. 5s, 800ms)
  CONCURRENCY         - Candidates verified at once
  HTTP_ADDRESS        - Address the HTTP server binds to
  TELEGRAM_API_TOKEN  - Bot API token for the bot command
")]
struct Cli {
    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxies line by line from a file or stdin
    Cli {
        /// Input file, or "stdin"
        #[arg(short, long, default_value = "stdin")]
        input: String,
        /// Output file for live proxies, or "stdout"
        #[arg(short, long, default_value = "stdout")]
        output: String,
        /// Candidates verified at once (overrides config when > 0)
        #[arg(short, long, default_value_t = 0)]
        concurrency: usize,
        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Serve the web form and JSON API
    Serve {
        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Run the Telegram bot
    Bot {
        /// Enable debug logging
        #[arg(long)]
        debug: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed, {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(run(cli));
    // a blocked stdin read must not keep the process alive
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_cancellation(&e) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("failed, {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    let verbose = match &cli.command {
        Commands::Cli { verbose, .. } | Commands::Serve { verbose } => *verbose,
        Commands::Bot { debug } => *debug,
    };
    config.verbose |= verbose;
    logging::init(&config.env, config.verbose)?;
    debug!("debug enabled");

    let shutdown = CancelToken::new();
    tokio::spawn(listen_for_signals(shutdown.clone()));

    match cli.command {
        Commands::Cli {
            input,
            output,
            concurrency,
            ..
        } => {
            if concurrency > 0 {
                config.proxy_checker.concurrency = concurrency;
            }
            run_cli(&config, LineSource::from_arg(&input), LineSink::from_arg(&output), shutdown).await
        }
        Commands::Serve { .. } => {
            info!(env = %config.env, "starting");
            server::serve(&config, shutdown).await
        }
        Commands::Bot { .. } => {
            info!("starting bot...");
            let engine = Arc::new(VerificationEngine::with_config(config.proxy_checker.clone()));
            let bot = Arc::new(TelegramBot::new(&config.bot, engine)?);
            bot.run(shutdown).await
        }
    }
}

/// Reader, engine and writer sharing one cancellation token.
///
/// A failing reader or writer cancels the others. Once cancelled the
/// pipeline gets [`SHUTDOWN_GRACE`] to flush before the run gives up.
async fn run_cli(config: &Config, source: LineSource, sink: LineSink, shutdown: CancelToken) -> Result<()> {
    let engine = VerificationEngine::with_config(config.proxy_checker.clone());
    info!(
        concurrency = engine.concurrency(),
        api = %config.proxy_checker.target,
        timeout = ?config.proxy_checker.timeout,
        "checking proxies"
    );

    let (tx, rx) = mpsc::channel(engine.concurrency());
    let Check { confirmed, finished } = engine.check(&shutdown, rx);

    let reader = {
        let cancel = shutdown.clone();
        tokio::spawn(async move { source.read(&cancel, tx).await })
    };
    let writer = {
        let cancel = shutdown.clone();
        tokio::spawn(async move { sink.write(&cancel, confirmed).await })
    };

    let pipeline = async {
        let (read, write) = tokio::join!(
            stage("input reader", reader, &shutdown),
            stage("output writer", writer, &shutdown),
        );
        let checked = match finished.await {
            Ok(status) => status.map_err(anyhow::Error::from),
            Err(_) => Ok(()),
        };
        first_error([read, write, checked])
    };
    tokio::pin!(pipeline);

    tokio::select! {
        outcome = &mut pipeline => outcome,
        reason = shutdown.cancelled() => {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut pipeline).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("pipeline did not stop within {:?}", SHUTDOWN_GRACE);
                    Err(reason.into())
                }
            }
        }
    }
}

/// Await one pipeline task, cancelling the rest if it fails
async fn stage(name: &str, task: tokio::task::JoinHandle<Result<()>>, cancel: &CancelToken) -> Result<()> {
    let outcome = task
        .await
        .with_context(|| format!("{} panicked", name))
        .and_then(|outcome| outcome);

    if let Err(e) = &outcome {
        if !is_cancellation(e) {
            error!(stage = name, error = %format!("{e:#}"), "pipeline stage failed");
            cancel.cancel();
        }
    }
    outcome
}

/// The first real failure wins over cancellations it caused
fn first_error<I: IntoIterator<Item = Result<()>>>(outcomes: I) -> Result<()> {
    let mut cancelled = None;
    for outcome in outcomes {
        match outcome {
            Ok(()) => {}
            Err(e) if is_cancellation(&e) => {
                cancelled.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }
    cancelled.map_or(Ok(()), Err)
}

fn is_cancellation(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| cause.downcast_ref::<CancelReason>().is_some())
}

/// Fire `shutdown` on SIGINT/SIGTERM
async fn listen_for_signals(shutdown: CancelToken) {
    if let Err(e) = wait_for_signal(&shutdown).await {
        error!(error = %e, "signal listener failed");
        return;
    }
    shutdown.cancel();
}

async fn wait_for_signal(shutdown: &CancelToken) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        let mut sigint = signal(SignalKind::interrupt()).context("Failed to listen for SIGINT")?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
            _ = shutdown.cancelled() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            received = tokio::signal::ctrl_c() => {
                received.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = shutdown.cancelled() => {}
        }
    }

    Ok(())
}
