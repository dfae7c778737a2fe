use cabourotte::cli::{Cli, LogFormat};
use cabourotte::config::Config;
use cabourotte::daemon::{Daemon, DaemonError};

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_logging(&cli);

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, path = %cli.config.display(), "cannot load the configuration");
            std::process::exit(1);
        }
    };

    let daemon = match Daemon::start(config, cli.config.clone()).await {
        Ok(daemon) => daemon,
        Err(DaemonError::Server(err)) => {
            error!(error = %err, "cannot start the HTTP server");
            std::process::exit(2);
        }
        Err(err) => {
            error!(error = %err, "cannot start the daemon");
            std::process::exit(1);
        }
    };

    let (mut sigint, mut sigterm, mut sighup) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) {
        (Ok(sigint), Ok(sigterm), Ok(sighup)) => (sigint, sigterm, sighup),
        _ => {
            error!("cannot install the signal handlers");
            std::process::exit(1);
        }
    };

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                break;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading");
                if let Err(err) = daemon.reload().await {
                    error!(error = %err, "reload failed, keeping the previous state");
                }
            }
        }
    }

    if let Err(err) = daemon.stop().await {
        error!(error = %err, "shutdown failed");
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Plain => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
