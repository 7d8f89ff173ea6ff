use {
    clap::Parser,
    tracing::{error, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "omnigate", about = "Omnigate — multi-channel AI messaging gateway")]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, env = "OMNIGATE_HOST")]
    bind: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long, env = "OMNIGATE_PORT")]
    port: Option<u16>,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() {
    // Load a .env file when present; the environment always wins.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_telemetry(&cli);

    let mut cfg = match omnigate_config::load_from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(2);
        },
    };
    if let Some(bind) = &cli.bind {
        cfg.host = bind.clone();
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting omnigate");
    if let Err(e) = omnigate_gateway::run(cfg).await {
        error!(error = %e, "gateway exited with an error");
        std::process::exit(1);
    }
}
