use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use alertiq::config::AppConfig;
use alertiq::processor::AlertProcessor;
use alertiq::scheduler::Scheduler;

#[derive(Parser)]
#[command(
    name = "alertiq",
    version,
    about = "AI-powered alert email processing and routing"
)]
struct Cli {
    /// Log verbosity (overrides LOG_LEVEL): trace, debug, info, warn, error.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one processing cycle and exit (default).
    Once,
    /// Run continuously on a fixed interval.
    Daemon {
        /// Processing interval in minutes (defaults to CHECK_INTERVAL_MINUTES).
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Test connectivity to every external dependency.
    Test,
    /// Print processing statistics.
    Stats,
    /// Remove audit records older than the retention window.
    Cleanup {
        /// Days of records to keep.
        #[arg(long, default_value_t = 90)]
        days: u32,
    },
    /// Export the audit log as JSON.
    Export {
        /// Output file path.
        #[arg(long, default_value = "processed_emails.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return 1;
        }
    };

    // Console + daily-rolling file logging. The guard must outlive all
    // logging, so it stays bound for the rest of run().
    let (log_dir, log_file) = config.log_split();
    let (file_writer, _guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, log_file));

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log.level.clone());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let processor = match AlertProcessor::from_config(&config) {
        Ok(processor) => Arc::new(processor),
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize processor");
            return 1;
        }
    };

    let interval = Duration::from_secs(config.processing.check_interval_minutes * 60);
    let scheduler = Scheduler::new(Arc::clone(&processor), interval);

    match cli.command.unwrap_or(Command::Once) {
        Command::Once => {
            if scheduler.run_once().await {
                0
            } else {
                1
            }
        }

        Command::Daemon { interval } => {
            scheduler
                .run_daemon(interval.map(|minutes| Duration::from_secs(minutes * 60)))
                .await;
            0
        }

        Command::Test => {
            let report = processor.test_connections().await;

            println!("\nConnection Test Results:");
            println!("{}", "=".repeat(30));
            for (component, healthy) in report.components() {
                let status = if healthy { "OK" } else { "FAILED" };
                println!("{component}: {status}");
            }
            let all_ok = report.all_ok();
            println!(
                "\nOverall Status: {}",
                if all_ok { "ALL SYSTEMS OK" } else { "SOME SYSTEMS FAILED" }
            );
            if all_ok { 0 } else { 1 }
        }

        Command::Stats => {
            let stats = processor.stats();
            if stats.total_processed == 0 {
                println!("No processing statistics available.");
                return 0;
            }

            println!("\nProcessing Statistics:");
            println!("{}", "=".repeat(30));
            println!("Total Processed: {}", stats.total_processed);
            println!("Successful: {}", stats.successful);
            println!("Failed: {}", stats.failed);
            println!("Success Rate: {:.1}%", stats.success_rate);
            println!("Recent (24h): {}", stats.recent_24h);

            if !stats.action_breakdown.is_empty() {
                println!("\nAction Breakdown:");
                for (action, count) in &stats.action_breakdown {
                    println!("  {action}: {count}");
                }
            }
            if !stats.team_distribution.is_empty() {
                println!("\nTeam Distribution:");
                for (team, count) in &stats.team_distribution {
                    println!("  {team}: {count}");
                }
            }
            0
        }

        Command::Cleanup { days } => {
            let removed = processor.cleanup_old_records(days);
            println!("Cleaned up {removed} old records.");
            0
        }

        Command::Export { output } => {
            if processor.audit().export_json(&output) {
                println!("Exported audit records to {}", output.display());
                0
            } else {
                1
            }
        }
    }
}
