use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use webwatch::{
    alerts::sink_from_config,
    api::{ApiConfig, ApiState, spawn_api_server},
    config::read_config_file,
    engine::Engine,
    session::HttpSessionFactory,
    util::{get_bind_override, get_config_path, get_log_directives},
};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,

    /// Don't start the HTTP API
    #[arg(long)]
    no_api: bool,
}

fn init() {
    let filter = get_log_directives()
        .parse::<filter::Targets>()
        .unwrap_or_else(|e| {
            eprintln!("invalid log directives, falling back to info: {e}");
            filter::Targets::new().with_default(tracing::Level::INFO)
        });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let path = get_config_path(args.file);
    let mut config = read_config_file(&path)?;
    if let Some(bind) = get_bind_override() {
        config.api.bind = bind;
    }
    info!("loaded {} websites from {path}", config.websites.len());

    let factory = Arc::new(HttpSessionFactory::from_config(&config.pool));
    let sink = sink_from_config(config.alerts.sink.as_ref());
    let engine = Arc::new(Engine::start(&config, factory, sink).await?);

    if !args.no_api {
        let state = ApiState::new(Arc::clone(&engine), config.broadcast.subscriber_buffer);
        let addr = spawn_api_server(ApiConfig::from(&config.api), state).await?;
        info!("API available at http://{addr}/api/v1");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }

    info!("shutting down");
    engine.shutdown().await;

    Ok(())
}
