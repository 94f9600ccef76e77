use clap::Parser;
use std::path::Path;
use std::process::exit;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use sslcheck::config::{Config, ConfigError, Settings, DEFAULT_CONFIG_FILE};
use sslcheck::report::{self, OutputFormat};
use sslcheck::{Checker, Report, SslCheckError};

mod metrics;

const USAGE: &str = "Usage: sslcheck --host example.com [--port 443] [--timeout 10] [--verbose]";

#[derive(Parser)]
#[command(name = "sslcheck")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Host to check (e.g., example.com, example.com:8443 or https://example.com)
    #[arg(long)]
    host: Option<String>,

    /// Port to connect to [default: 443]
    #[arg(short, long)]
    port: Option<u16>,

    /// Connection timeout in seconds, per connection [default: 10]
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Show detailed certificate information
    #[arg(short, long)]
    verbose: bool,

    /// Output format: text, json or summary [default: text]
    #[arg(short, long)]
    output: Option<String>,

    /// PEM bundle of trusted roots to verify against instead of the system store
    #[arg(long)]
    ca_file: Option<String>,

    /// Extra attempts for a failed protocol probe before it counts as unsupported
    #[arg(long)]
    retries: Option<u32>,

    /// Path to a TOML configuration file [default: ./sslcheck.toml when present]
    #[arg(short, long)]
    config: Option<String>,

    /// Print an example configuration file and exit
    #[arg(long)]
    generate_config: bool,

    /// Push metrics to a Prometheus Push Gateway
    #[arg(long)]
    prometheus: bool,

    /// Prometheus Push Gateway address
    #[arg(long)]
    prometheus_address: Option<String>,

    /// Log level for diagnostics on stderr
    #[arg(long, default_value = "warn")]
    log_level: Level,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            exit(1);
        }
    };

    if cli.generate_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    let file_config = match load_file_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };

    let cli_config = Config::from_cli_args(
        cli.host,
        cli.port,
        cli.timeout,
        cli.verbose.then_some(true),
        cli.output,
        cli.ca_file,
        cli.retries,
        cli.prometheus.then_some(true),
        cli.prometheus_address,
    );
    let config = Config::default()
        .merge_with(file_config)
        .merge_with(cli_config);

    if config.host.as_deref().map_or(true, |host| host.trim().is_empty()) {
        eprintln!("Error: Host is required");
        eprintln!("{}", USAGE);
        exit(1);
    }

    let settings = match config.resolve() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };

    match run(&settings) {
        Ok(code) => exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    }
}

/// Reads the explicit config file, or `sslcheck.toml` when it exists.
fn load_file_config(path: Option<&str>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => Config::from_file(path),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            debug!(path = DEFAULT_CONFIG_FILE, "loading default config file");
            Config::from_file(DEFAULT_CONFIG_FILE)
        }
        None => Ok(Config::default()),
    }
}

/// Runs the check and prints the report; returns the process exit code.
fn run(settings: &Settings) -> Result<i32, SslCheckError> {
    let checker = Checker::new(settings.target.clone(), settings.options.clone());

    let report = match settings.output {
        OutputFormat::Text => run_text(&checker, settings.verbose)?,
        OutputFormat::Json => {
            let report = checker.run()?;
            let json = report::render_json(&report)
                .map_err(|e| SslCheckError::from(format!("failed to serialize report: {}", e)))?;
            println!("{}", json);
            report
        }
        OutputFormat::Summary => {
            let report = checker.run()?;
            print!("{}", report::render_summary(&report));
            report
        }
    };

    if let Some(address) = &settings.prometheus_address {
        metrics::prom::prometheus_metrics(&report, address);
    }

    Ok(if report.has_failures() {
        settings.exit_code
    } else {
        0
    })
}

/// Prints each section as soon as its stage finishes.
fn run_text(checker: &Checker, verbose: bool) -> Result<Report, SslCheckError> {
    println!("{}", report::render_header(checker.target()));

    let protocols = checker.probe_protocols();
    println!("{}", report::render_protocols(&protocols, verbose));

    let chain = checker.fetch_chain()?;
    let negotiated = chain.negotiated();
    print!("{}", report::render_chain_header(&negotiated));

    let certificates = checker.inspect(&chain)?;
    for (index, certificate) in certificates.iter().enumerate() {
        if index > 0 {
            println!();
        }
        print!("{}", report::render_certificate(index, certificate, verbose));
    }
    println!();

    let verification = checker.verify(&chain)?;
    print!("{}", report::render_verification(&verification));

    Ok(Report {
        target: checker.target().clone(),
        protocols,
        negotiated,
        certificates,
        verification,
    })
}
