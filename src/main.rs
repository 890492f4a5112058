//! Sleep Sounds CLI - ambient sound mixer with a sleep timer
//!
//! Layer looping sounds and synthesized noise, then let the sleep timer
//! fade everything out:
//! - `sleepsounds daemon` runs the audio engine in the background
//! - `sleepsounds play rain --url /sounds/rain.mp3` starts a loop
//! - `sleepsounds play box-fan` starts synthesized fan noise
//! - `sleepsounds timer 30` fades out after 30 minutes

use anyhow::Result;
use clap::{CommandFactory, Parser};

use sleepsounds::cli::{Cli, Commands, Display, IpcClient};
use sleepsounds::daemon::service::{run_daemon, DaemonOptions};
use sleepsounds::daemon::timer::{Clock, SystemClock};

/// Main entry point
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_tracing(cli.verbose);

    // Execute command
    if let Err(e) = execute(cli).await {
        Display::show_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber for logging.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn client(cli: &Cli) -> Result<IpcClient> {
    match &cli.socket {
        Some(path) => Ok(IpcClient::with_socket_path(path.clone())),
        None => IpcClient::new(),
    }
}

/// Executes the CLI command.
async fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    let Some(command) = cli.command.clone() else {
        // No command provided, show help
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Init => {
            let response = client(&cli)?.initialize().await?;
            Display::show_success(&response);
        }
        Commands::Play(args) => {
            let response = client(&cli)?.play(&args).await?;
            Display::show_play_success(&response);
        }
        Commands::Stop { id } => {
            let response = client(&cli)?.stop(&id).await?;
            Display::show_success(&response);
        }
        Commands::StopAll => {
            let response = client(&cli)?.stop_all().await?;
            Display::show_success(&response);
        }
        Commands::FadeOut => {
            let response = client(&cli)?.fade_out().await?;
            Display::show_success(&response);
        }
        Commands::Volume { id, volume } => {
            let response = client(&cli)?.set_volume(&id, volume).await?;
            Display::show_play_success(&response);
        }
        Commands::Timer(args) => {
            let response = client(&cli)?.set_sleep_timer(&args).await?;
            Display::show_timer(&response);
        }
        Commands::Alarm(args) => {
            let response = client(&cli)?.set_alarm_clock(&args).await?;
            Display::show_success(&response);
        }
        Commands::AlarmTarget => {
            let response = client(&cli)?.persisted_timestamp().await?;
            Display::show_alarm_target(&response, SystemClock.now_ms());
        }
        Commands::Status => {
            let response = client(&cli)?.status().await?;
            Display::show_status(&response);
        }
        Commands::ClearData => {
            let response = client(&cli)?.clear_all_data().await?;
            Display::show_success(&response);
        }
        Commands::FocusLost { transient } => {
            let response = client(&cli)?.focus_lost(transient).await?;
            Display::show_success(&response);
        }
        Commands::Daemon(args) => {
            run_daemon(DaemonOptions {
                config_path: args.config,
                socket_path: cli.socket.clone(),
            })
            .await?;
        }
        Commands::Completions { shell } => {
            generate_completions(shell);
        }
    }

    Ok(())
}

/// Generates shell completion scripts.
fn generate_completions(shell: clap_complete::Shell) {
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}

// ============================================================================
// Tests
// ============================================================================
