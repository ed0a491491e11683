use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use matchfeed_server::ServerConfig;
use matchfeed_store::Database;
use matchfeed_telemetry::{LogQuery, SqliteLogSink, TelemetryConfig};

/// Live match commentary over REST and WebSocket.
#[derive(Debug, Parser)]
#[command(name = "matchfeed", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(long, env = "PORT", default_value_t = 3001)]
    port: u16,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// SQLite database path. Defaults to ~/.matchfeed/matchfeed.db.
    #[arg(long, env = "MATCHFEED_DB")]
    db: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// Per-module level, e.g. `matchfeed_server::replay=debug`. Repeatable.
    #[arg(long = "log-module", value_name = "MODULE=LEVEL", value_parser = parse_module_level)]
    log_modules: Vec<(String, tracing::Level)>,

    /// Emit JSON log lines instead of compact text.
    #[arg(long)]
    log_json: bool,

    /// Persist warn+ logs to ~/.matchfeed/logs.db.
    #[arg(long)]
    log_db: bool,

    /// Disable the scheduled-commentary replay engine.
    #[arg(long)]
    no_replay: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print persisted warn+ logs as JSON lines, newest first.
    Logs(LogsArgs),
}

#[derive(Debug, Args)]
struct LogsArgs {
    /// WARN or ERROR.
    #[arg(long)]
    level: Option<String>,

    #[arg(long)]
    target: Option<String>,

    #[arg(long = "match")]
    match_id: Option<String>,

    /// RFC 3339 lower bound on the record timestamp.
    #[arg(long)]
    since: Option<String>,

    #[arg(long, default_value_t = 50)]
    limit: u32,
}

fn parse_module_level(raw: &str) -> Result<(String, tracing::Level), String> {
    let (module, level) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected MODULE=LEVEL, got {raw:?}"))?;
    if module.is_empty() {
        return Err(format!("missing module in {raw:?}"));
    }
    let level = level
        .parse::<tracing::Level>()
        .map_err(|e| format!("{level:?}: {e}"))?;
    Ok((module.to_string(), level))
}

fn print_logs(args: LogsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let sink = SqliteLogSink::new(&TelemetryConfig::default().log_db_path)?;
    let records = sink.query(&LogQuery {
        level: args.level.map(|l| l.to_uppercase()),
        target: args.target,
        match_id: args.match_id,
        since: args.since,
        limit: Some(args.limit),
    })?;
    for record in records {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(Command::Logs(args)) = cli.command {
        if let Err(e) = print_logs(args) {
            eprintln!("matchfeed logs: {e}");
            std::process::exit(1);
        }
        return;
    }

    let telemetry = matchfeed_telemetry::init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        module_levels: cli.log_modules,
        json: cli.log_json,
        log_to_sqlite: cli.log_db,
        ..Default::default()
    });

    tracing::info!("Starting matchfeed");
    if let Some(sink) = telemetry.logs() {
        match sink.count() {
            Ok(persisted) => tracing::info!(persisted, "persisting warn+ logs"),
            Err(e) => tracing::warn!(error = %e, "log database unreadable"),
        }
    }

    let db_path = cli
        .db
        .unwrap_or_else(|| matchfeed_telemetry::data_dir().join("matchfeed.db"));
    let db = Database::open(&db_path).expect("Failed to open database");

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        replay: !cli.no_replay,
        ..Default::default()
    };
    let handle = matchfeed_server::start(config, db)
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "matchfeed ready");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
    handle.shutdown().await;
}
