use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use request_telemetry::observability::trail::collect_trail;

#[derive(Parser)]
#[command(name = "log-trail")]
#[command(about = "Reconstruct one request's trail from category log files", long_about = None)]
struct Cli {
    /// Correlation id returned in the X-Correlation-ID header
    correlation_id: String,

    #[arg(short, long, default_value = "./logs")]
    logs_dir: PathBuf,

    #[arg(short, long, value_enum, default_value_t = Format::Summary)]
    format: Format,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// One line per record
    Summary,
    /// Raw NDJSON records
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let report = collect_trail(&cli.logs_dir, &cli.correlation_id)?;

    if report.records.is_empty() {
        eprintln!(
            "No records for {} under {}",
            cli.correlation_id,
            cli.logs_dir.display()
        );
    }

    for record in &report.records {
        match cli.format {
            Format::Json => println!("{}", serde_json::to_string(record)?),
            Format::Summary => println!(
                "{} {:<5} {:<10} {}",
                record.envelope.timestamp.to_rfc3339(),
                record.envelope.level.to_string(),
                record.category().as_str(),
                record.envelope.message
            ),
        }
    }

    if report.skipped_lines > 0 {
        eprintln!("Skipped {} unreadable lines", report.skipped_lines);
    }
    Ok(())
}
