use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};

use sslkeeper::config::{self, Config};
use sslkeeper::discovery::{self, DEFAULT_NGINX_PATHS};
use sslkeeper::observability;
use sslkeeper::settings::{self, SettingsStore, TomlSettings};
use sslkeeper::store::{open_store, CertificateRecord};
use sslkeeper::tls::provider::factory::create_provider_chain;
use sslkeeper::tls::provider::CREDENTIAL_KEYS;
use sslkeeper::tls::{CommandReload, FileDeployer, RenewalConfig, RenewalEngine};

#[derive(Parser)]
#[command(name = "sslkeeper")]
#[command(about = "Keeps web-server TLS certificates fetched, deployed and renewed", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "sslkeeper.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the renewal scheduler until interrupted
    Run,
    /// Renew certificates that are due, or a single domain
    Update {
        #[arg(short, long)]
        domain: Option<String>,
        /// Renew even when the certificate is outside the renewal window
        #[arg(short, long)]
        force: bool,
    },
    /// Register a domain and deploy its certificate
    Add {
        domain: String,
        cert_path: String,
        key_path: String,
    },
    /// Stop managing a certificate by id
    Del { id: i64 },
    /// List managed certificates
    Show,
    /// Register TLS sites found in nginx configuration
    Find {
        /// Files or `dir/*.conf` patterns; defaults to the usual nginx locations
        paths: Vec<String>,
    },
    /// Show provider credentials with secrets masked
    Config,
    /// Store a setting, e.g. `set third.certd key_id abc123`
    Set {
        section: String,
        key: String,
        value: String,
    },
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Show);

    match command {
        Commands::Version => {
            println!("sslkeeper {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::Config => {
            let settings = TomlSettings::new(&cli.config);
            print_credentials(&settings)?;
            return Ok(());
        }
        Commands::Set { section, key, value } => {
            let settings = TomlSettings::new(&cli.config);
            settings
                .set(&section, &key, &value)
                .with_context(|| format!("Failed to store {}.{}", section, key))?;
            println!("Saved {} in [{}]", key, section);
            return Ok(());
        }
        _ => {}
    }

    let config = config::load_or_default(&cli.config)?;
    let _guard = observability::logging::init_logging(&config.logging);
    let engine = build_engine(&cli.config, &config).await?;

    match command {
        Commands::Run => {
            info!("Starting sslkeeper...");
            if let Err(e) = engine.update_all().await {
                error!("Initial renewal pass failed: {}", e);
            }

            tokio::select! {
                _ = engine.start() => {}
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for shutdown signal")?;
                    info!("Shutting down...");
                }
            }
        }
        Commands::Update { domain, force } => match domain {
            Some(domain) => {
                let outcome = engine.renew_domain(&domain, force).await?;
                println!("{}: {}", domain, outcome);
            }
            None => {
                let report = engine.update_all().await?;
                for (domain, outcome) in &report.outcomes {
                    println!("{}: {}", domain, outcome);
                }
                if report.reloaded {
                    println!("Web server reloaded");
                }
            }
        },
        Commands::Add {
            domain,
            cert_path,
            key_path,
        } => {
            let record = engine.register(&domain, &cert_path, &key_path).await?;
            println!("Added {} with id {}", record.domain, record.id);
        }
        Commands::Del { id } => {
            let record = engine.remove(id).await?;
            println!("Removed {} (id {})", record.domain, record.id);
        }
        Commands::Show => {
            let records = engine.records().await?;
            if records.is_empty() {
                println!("No certificates managed yet");
            }
            for record in &records {
                print_record(record);
            }
        }
        Commands::Find { paths } => {
            let patterns: Vec<String> = if paths.is_empty() {
                DEFAULT_NGINX_PATHS.iter().map(|p| p.to_string()).collect()
            } else {
                paths
            };

            let sites = discovery::scan_paths(patterns.as_slice())?;
            if sites.is_empty() {
                println!("No TLS sites found");
            }
            for site in sites {
                match engine
                    .register(&site.domain, &site.cert_path, &site.key_path)
                    .await
                {
                    Ok(record) => println!("Added {} with id {}", record.domain, record.id),
                    Err(e) => warn!(
                        "Skipping {} from {}: {}",
                        site.domain,
                        site.source.display(),
                        e
                    ),
                }
            }
        }
        Commands::Version | Commands::Config | Commands::Set { .. } => {}
    }

    Ok(())
}

async fn build_engine(config_path: &str, config: &Config) -> Result<RenewalEngine> {
    let settings: Arc<dyn SettingsStore> = Arc::new(TomlSettings::new(config_path));

    let store = open_store(&config.storage)
        .await
        .context("Failed to open certificate store")?;
    info!("Using {} certificate store", store.backend_name());

    let providers = create_provider_chain(&config.providers, settings)
        .context("Failed to build provider chain")?;

    Ok(RenewalEngine::new(
        store,
        providers,
        FileDeployer::new(),
        Arc::new(CommandReload::new(config.reload.command.clone())),
        RenewalConfig::from(&config.renewal),
    ))
}

fn print_record(record: &CertificateRecord) {
    let format_time = |at: Option<chrono::DateTime<chrono::Utc>>| {
        at.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    println!("id:      {}", record.id);
    println!("domain:  {}", record.domain);
    println!("status:  {}", record.status());
    println!("issued:  {}", format_time(record.issued_at()));
    println!("expires: {}", format_time(record.expires_at()));
    println!("cert:    {}", record.cert_path);
    println!("key:     {}", record.key_path);
    println!("source:  {}", record.cert_source);
    println!();
}

fn print_credentials(store: &dyn SettingsStore) -> Result<()> {
    for (section, keys) in CREDENTIAL_KEYS {
        println!("[{}]", section);
        for key in keys.iter() {
            let value = store
                .get(section, key)
                .with_context(|| format!("Failed to read {}.{}", section, key))?
                .unwrap_or_default();
            println!("{} = {}", key, settings::display_value(key, &value));
        }
        println!();
    }
    Ok(())
}
