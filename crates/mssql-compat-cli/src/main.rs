//! mssql-compat CLI - run SQLite-style SQL against SQL Server.

use clap::{Parser, Subcommand};
use mssql_compat::dialect::Translation;
use mssql_compat::lifecycle::{self, Shutdown};
use mssql_compat::{
    CompatError, Config, ConnectionManager, ExecutionResult, Executor, MssqlManager, Scalar,
    StatementKind, Translator,
};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// Exit code used when a termination signal interrupts a command.
const INTERRUPTED_EXIT: u8 = 130;

#[derive(Parser)]
#[command(name = "mssql-compat")]
#[command(about = "Run SQLite-style SQL against Microsoft SQL Server")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Seconds to wait for the pool to close on shutdown (overrides config)
    #[arg(long)]
    shutdown_timeout: Option<u64>,

    /// Read query timeout in milliseconds (overrides config)
    #[arg(long)]
    query_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the SQL Server statement and bindings for a query (no database)
    Translate {
        /// Statement in the source dialect
        sql: String,

        /// Positional parameter as a JSON literal (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Translate as a write statement, as `run` would
        #[arg(long)]
        write: bool,
    },

    /// Run a read statement and print the rows
    Query {
        /// Statement in the source dialect
        sql: String,

        /// Positional parameter as a JSON literal (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Run a write statement and print the identity and affected rows
    Run {
        /// Statement in the source dialect
        sql: String,

        /// Positional parameter as a JSON literal (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Call a stored procedure
    Exec {
        /// Procedure name, optionally schema-qualified
        procedure: String,

        /// Named parameter as NAME=JSON (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Test the database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CompatError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(CompatError::Config)?;

    // Translation needs no configuration or connection.
    if let Commands::Translate { sql, params, write } = &cli.command {
        let params = parse_positional(params)?;
        let kind = StatementKind::classify(sql, *write);
        let translation = Translator::default().translate(sql, &params, kind)?;
        print_translation(&translation, cli.output_json)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::load(&cli.config)?;
    if let Some(secs) = cli.shutdown_timeout {
        config.shutdown.close_timeout_secs = secs;
    }
    if let Some(ms) = cli.query_timeout_ms {
        config.executor.query_timeout_ms = Some(ms);
    }
    config.validate()?;
    info!("Loaded configuration from {:?}", cli.config);

    let grace = config.shutdown.close_timeout();
    let manager = Arc::new(MssqlManager::from_config(&config));
    let executor = Executor::new(manager.clone(), config.executor.clone());
    let shutdown = lifecycle::spawn_shutdown_listener(manager.clone(), grace);

    match cli.command {
        Commands::Translate { .. } => unreachable!(), // Handled above
        Commands::Query { sql, params } => {
            let params = parse_positional(&params)?;
            let rows = until_shutdown(&shutdown, executor.query(&sql, &params)).await;
            let Some(rows) = rows else {
                return Ok(interrupted(shutdown).await);
            };
            let rows = finish(manager.as_ref(), grace, rows).await?;
            print_result(&ExecutionResult::from(rows), cli.output_json)?;
        }
        Commands::Run { sql, params } => {
            let params = parse_positional(&params)?;
            let result = until_shutdown(&shutdown, executor.run(&sql, &params)).await;
            let Some(result) = result else {
                return Ok(interrupted(shutdown).await);
            };
            let result = finish(manager.as_ref(), grace, result).await?;
            print_result(&ExecutionResult::from(result), cli.output_json)?;
        }
        Commands::Exec { procedure, params } => {
            let named = parse_named(&params)?;
            let refs: Vec<(&str, Scalar)> =
                named.iter().map(|(n, v)| (n.as_str(), v.clone())).collect();
            let rows = until_shutdown(&shutdown, executor.execute(&procedure, &refs)).await;
            let Some(rows) = rows else {
                return Ok(interrupted(shutdown).await);
            };
            let rows = finish(manager.as_ref(), grace, rows).await?;
            print_result(&ExecutionResult::from(rows), cli.output_json)?;
        }
        Commands::HealthCheck => {
            let ping = until_shutdown(&shutdown, manager.ping()).await;
            let Some(ping) = ping else {
                return Ok(interrupted(shutdown).await);
            };
            let healthy = ping.is_ok();

            if cli.output_json {
                let report = serde_json::json!({
                    "healthy": healthy,
                    "server": config.database.display_string(),
                    "latency_ms": ping.as_ref().ok().map(|d| d.as_millis() as u64),
                    "error": ping.as_ref().err().map(|e| e.to_string()),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Health Check Results:");
                match &ping {
                    Ok(latency) => println!("  MSSQL: OK ({}ms)", latency.as_millis()),
                    Err(e) => {
                        println!("  MSSQL: FAILED");
                        println!("    Error: {}", e);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            finish(manager.as_ref(), grace, ping).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Await `work` unless a termination signal arrives first.
async fn until_shutdown<F: Future>(shutdown: &Shutdown, work: F) -> Option<F::Output> {
    let token = shutdown.token();
    tokio::select! {
        out = work => Some(out),
        _ = token.cancelled() => None,
    }
}

async fn interrupted(shutdown: Shutdown) -> ExitCode {
    shutdown.finished().await;
    eprintln!("Interrupted");
    ExitCode::from(INTERRUPTED_EXIT)
}

/// Close the pool after a completed command and pass its result through.
async fn finish<M: ConnectionManager, T>(
    manager: &M,
    grace: Duration,
    result: Result<T, CompatError>,
) -> Result<T, CompatError> {
    lifecycle::drain(manager, grace).await;
    result
}

/// Parse positional parameters. Values that are not valid JSON are taken as text.
fn parse_positional(raw: &[String]) -> Result<Vec<Scalar>, CompatError> {
    Ok(raw.iter().map(|s| parse_value(s)).collect())
}

fn parse_named(raw: &[String]) -> Result<Vec<(String, Scalar)>, CompatError> {
    raw.iter()
        .map(|s| {
            let (name, value) = s.split_once('=').ok_or_else(|| {
                CompatError::Config(format!("Parameter '{}' must be NAME=VALUE", s))
            })?;
            Ok((name.trim().to_string(), parse_value(value)))
        })
        .collect()
}

fn parse_value(raw: &str) -> Scalar {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => Scalar::from_json(&value),
        Err(_) => Scalar::Text(raw.to_string()),
    }
}

fn print_translation(t: &Translation, json: bool) -> Result<(), CompatError> {
    if json {
        let bindings: Vec<_> = t
            .bound
            .bindings
            .iter()
            .map(|b| serde_json::json!({ "name": format!("@{}", b.name), "value": b.value }))
            .collect();
        let effects: Vec<_> = t.effects.iter().map(|e| format!("{:?}", e)).collect();
        let out = serde_json::json!({
            "kind": t.kind.as_str(),
            "sql": t.bound.text,
            "effects": effects,
            "bindings": bindings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", t.bound.text);
        for b in &t.bound.bindings {
            println!("  @{} = {}", b.name, b.value);
        }
    }
    Ok(())
}

fn print_result(result: &ExecutionResult, json: bool) -> Result<(), CompatError> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    match result {
        ExecutionResult::Rows(rows) => {
            if let Some(first) = rows.first() {
                println!("{}", first.columns().join("\t"));
            }
            for row in rows {
                let values: Vec<String> = row.values().iter().map(|v| v.to_string()).collect();
                println!("{}", values.join("\t"));
            }
            println!("({} row{})", rows.len(), if rows.len() == 1 { "" } else { "s" });
        }
        ExecutionResult::Write(write) => {
            match write.id() {
                Some(id) => println!("id: {}", id),
                None => println!("id: (none)"),
            }
            println!("changes: {}", write.changes());
        }
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
