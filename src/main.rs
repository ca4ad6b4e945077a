mod aggregator;
mod dispatcher;
mod filter;
mod loader;
mod models;
mod normalize;
mod report;

use aggregator::AggregatedRow;
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use dispatcher::{DispatchReport, DryRunGateway};
use loader::ExportLoader;
use models::{Config, Table};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn init_logging() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let matches = Command::new("training-reminder")
        .version("0.1")
        .about("Collects outstanding trainings per employee and sends reminder emails")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Compose reminders and log them instead of calling the database"),
        )
        .arg(
            Arg::new("no-send")
                .long("no-send")
                .action(ArgAction::SetTrue)
                .help("Only write the aggregated reports"),
        )
        .arg(
            Arg::new("files")
                .value_name("FILE")
                .num_args(0..)
                .help("Training exports to process (defaults to the data directory)"),
        )
        .get_matches();

    let config_file = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config.toml");

    let config = if Path::new(config_file).exists() {
        println!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(config_file)
            .with_context(|| format!("Failed to load configuration: {}", config_file))?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        Config::default().save_to_file(config_file)?;
        println!("⚠️  Please edit {} and set the database credentials, then run the program again.", config_file);
        return Ok(());
    };

    let inputs: Vec<PathBuf> = match matches.get_many::<String>("files") {
        Some(files) => files.map(PathBuf::from).collect(),
        None => {
            let data_dir = config.data_directory.as_deref().unwrap_or("data-source");
            println!("📂 Reading exports from: {}", data_dir);
            loader::discover_inputs(Path::new(data_dir))?
        }
    };

    if inputs.is_empty() {
        println!("❌ No training exports to process");
        return Ok(());
    }

    let export_loader = ExportLoader::new(config.skip_rows);
    let mut sources = Vec::with_capacity(inputs.len());
    for path in &inputs {
        println!("📄 Processing: {}", path.display());
        let table = export_loader.load_file(path)?;
        sources.push(table);
    }

    let (unified, aggregated) = run_pipeline(sources, &config)?;

    let output_dir = config.output_directory.as_deref().unwrap_or("output");
    fs::create_dir_all(output_dir)?;
    report::write_aggregated_csv(&aggregated, &unified.columns, &Path::new(output_dir).join("aggregated.csv"))?;
    report::write_preview_html(&aggregated, &Path::new(output_dir).join("preview.html"))?;

    let dispatch = if matches.get_flag("no-send") {
        None
    } else if matches.get_flag("dry-run") {
        Some(dispatcher::dispatch_over(Ok(DryRunGateway::default()), &aggregated, &config.email).await)
    } else {
        Some(dispatcher::send_reminders(&aggregated, &config.database, &config.email).await)
    };

    print_summary(inputs.len(), &unified, &aggregated, dispatch.as_ref());
    println!("📂 Reports written to: {}", output_dir);
    Ok(())
}

/// Normalizes each export, stacks the actionable rows and groups them per user.
fn run_pipeline(sources: Vec<Table>, config: &Config) -> Result<(Table, Vec<AggregatedRow>)> {
    let mut prepared = Vec::with_capacity(sources.len());
    for (i, mut table) in sources.into_iter().enumerate() {
        normalize::normalize_columns(&mut table);
        normalize::clean_full_names(&mut table).with_context(|| format!("Source {} is not a training export", i + 1))?;
        if config.drop_missing_cadre {
            table = filter::drop_missing_cadre(table);
        }
        prepared.push(table);
    }

    let unified = filter::stack_sources(&prepared, &config.filter)?;
    if unified.is_empty() {
        info!("no outstanding training records");
    } else {
        info!(rows = unified.len(), "stacked actionable training records");
    }

    let aggregated = aggregator::aggregate_by_user(&unified, &config.style)?;
    info!(users = aggregated.len(), "aggregated training records per user");

    Ok((unified, aggregated))
}

fn print_summary(files: usize, unified: &Table, aggregated: &[AggregatedRow], dispatch: Option<&DispatchReport>) {
    println!("\n📊 SUMMARY");
    println!("==========\n");
    println!("📄 Exports processed: {}", files);
    println!("🎯 Outstanding training records: {}", unified.len());
    println!("👥 Employees with outstanding trainings: {}", aggregated.len());

    match dispatch {
        None => println!("✉️  Email dispatch skipped"),
        Some(report) if !report.connected => println!("❌ Could not connect to the mail database; no reminders sent"),
        Some(report) => {
            println!("✉️  Reminders attempted: {}", report.attempted);
            println!("   ✅ Sent: {}", report.sent);
            if report.failed > 0 {
                println!("   ❌ Failed: {}", report.failed);
            }
        }
    }
}
