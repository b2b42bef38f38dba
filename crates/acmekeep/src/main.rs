//! acmekeep - command line entry point

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use acmekeep::blob::FsBlobStore;
use acmekeep::challenge::{ChallengeBackends, ChallengeStrategy};
use acmekeep::config::{AgentConfig, ENV_DIRECTORY_URL, ENV_HTTP_PORT};
use acmekeep::dns::{AwsCredentials, Route53Client, ENV_ACCESS_KEY_ID, ENV_SECRET_ACCESS_KEY};
use acmekeep::service::{
    Agent, AuthorizeOptions, AuthorizeService, InventoryService, IssueOptions, IssueOutcome,
    IssueRequest, IssueService, RegisterOptions, RegisterService, SyncService,
};
use acmekeep::storage::StoreLayout;
use acmekeep::RenewalScheduler;

/// acmekeep - ACME account, authorization and certificate agent
#[derive(Parser, Debug)]
#[command(name = "acmekeep")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// JSON configuration file
    #[arg(short = 'c', long = "config", env = "ACMEKEEP_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Account email
    #[arg(long = "email", env = "ACMEKEEP_EMAIL", global = true)]
    email: Option<String>,

    /// Root directory of the store
    #[arg(long = "data-dir", global = true)]
    data_dir: Option<PathBuf>,

    /// Store layout (v1 or v2)
    #[arg(long = "layout", global = true)]
    layout: Option<StoreLayout>,

    /// ACME directory URL
    #[arg(long = "directory-url", env = ENV_DIRECTORY_URL, global = true)]
    directory_url: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register the account
    Reg {
        /// Agree to the CA's terms of service
        #[arg(long = "agree-tos")]
        agree_tos: bool,

        /// Register a new key even if a registration exists
        #[arg(long = "override")]
        override_existing: bool,
    },
    /// Prove control of a domain
    Authz {
        #[arg(long = "domain")]
        domain: String,

        /// dns-01, http-01 or s3-http-01
        #[arg(long = "challenge")]
        challenge: Option<ChallengeStrategy>,

        /// Port of the HTTP-01 listener
        #[arg(long = "http-port", env = ENV_HTTP_PORT)]
        http_port: Option<u16>,

        /// Re-authorize even if a valid authorization is stored
        #[arg(long = "renew")]
        renew: bool,
    },
    /// Issue a certificate
    Cert {
        /// Common Name
        #[arg(long = "cn")]
        common_name: String,

        /// Additional subject alternative names
        #[arg(long = "domain")]
        domains: Vec<String>,

        #[arg(long = "challenge")]
        challenge: Option<ChallengeStrategy>,

        #[arg(long = "http-port", env = ENV_HTTP_PORT)]
        http_port: Option<u16>,

        /// Issue even when the current certificate is not due for renewal
        #[arg(long = "force")]
        force: bool,

        /// Reuse the stored certificate key
        #[arg(long = "reuse-key")]
        reuse_key: bool,
    },
    /// List stored certificates as JSON
    Ls,
    /// Copy a domain's key and certificate into a local directory
    Sync {
        #[arg(long = "domain")]
        domain: String,

        /// Destination directory (defaults to the domain name)
        #[arg(long = "dest")]
        dest: Option<PathBuf>,
    },
    /// Renew certificates that are due
    Renew {
        /// Keep running and check every N seconds (minimum one hour)
        #[arg(long = "interval")]
        interval: Option<u64>,

        #[arg(long = "challenge")]
        challenge: Option<ChallengeStrategy>,

        #[arg(long = "http-port", env = ENV_HTTP_PORT)]
        http_port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let mut config = match &cli.config {
        Some(path) => AgentConfig::from_file(path).context("Failed to load configuration file")?,
        None => AgentConfig::default(),
    };
    config
        .apply_env()
        .context("Invalid environment configuration")?;

    if let Some(url) = cli.directory_url.clone() {
        config.directory_url = url;
    }
    if let Some(dir) = cli.data_dir.clone() {
        config.data_dir = dir;
    }
    if let Some(layout) = cli.layout {
        config.layout = layout;
    }

    match cli.command {
        Commands::Reg {
            agree_tos,
            override_existing,
        } => {
            let agent = build_agent(config)?;
            let store = agent.store(&require_email(&cli.email)?)?;
            let registration = RegisterService::new(&agent)
                .register(
                    &store,
                    &RegisterOptions {
                        agree_tos,
                        override_existing,
                    },
                )
                .await
                .context("Registration failed")?;

            info!(account_url = %registration.url, agreed = registration.agreed, "Registration done");
            if !registration.agreed {
                println!("terms of service: {}", registration.terms_of_service);
            }
        }
        Commands::Authz {
            domain,
            challenge,
            http_port,
            renew,
        } => {
            apply_challenge_overrides(&mut config, challenge, http_port);
            let strategy = config.strategy;
            let agent = build_agent(config)?;
            require_backend(&agent, strategy)?;
            let store = agent.store(&require_email(&cli.email)?)?;
            let mut client = agent.connect(&store).await.context("Failed to initialize ACME client")?;

            let authz = AuthorizeService::new(&agent)
                .authorize(&mut client, &store, &domain, AuthorizeOptions { strategy, renew })
                .await
                .with_context(|| format!("Authorization of {domain} failed"))?;

            info!(domain = %domain, status = %authz.status, authorization = %authz.url, "Authorization done");
        }
        Commands::Cert {
            common_name,
            domains,
            challenge,
            http_port,
            force,
            reuse_key,
        } => {
            apply_challenge_overrides(&mut config, challenge, http_port);
            let options = IssueOptions {
                strategy: config.strategy,
                force,
                reuse_key,
                renew_authorizations: false,
            };
            let agent = build_agent(config)?;
            require_backend(&agent, options.strategy)?;
            let store = agent.store(&require_email(&cli.email)?)?;
            let mut client = agent.connect(&store).await.context("Failed to initialize ACME client")?;

            let request = IssueRequest::new(common_name.as_str()).with_sans(domains);
            let outcome = IssueService::new(&agent)
                .issue(&mut client, &store, &request, options)
                .await
                .with_context(|| format!("Issuance for {common_name} failed"))?;

            match outcome {
                IssueOutcome::Issued(info) => {
                    info!(domain = %common_name, not_after = %info.not_after, "Certificate issued")
                }
                IssueOutcome::Skipped(info) => {
                    info!(domain = %common_name, not_after = %info.not_after, "Certificate kept")
                }
            }
        }
        Commands::Ls => {
            let agent = build_agent(config)?;
            let entries = InventoryService::new(agent.blob_store().clone(), agent.config().layout)
                .list()
                .await
                .context("Failed to list certificates")?;

            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Sync { domain, dest } => {
            let agent = build_agent(config)?;
            let store = agent.store(&require_email(&cli.email)?)?;
            let dest = dest.unwrap_or_else(|| PathBuf::from(&domain));

            let files = SyncService::new(&store)
                .sync(&domain, &dest)
                .await
                .with_context(|| format!("Failed to sync {domain}"))?;

            info!(
                key = %files.private_key.display(),
                cert = %files.certificate.display(),
                "Synced"
            );
        }
        Commands::Renew {
            interval,
            challenge,
            http_port,
        } => {
            apply_challenge_overrides(&mut config, challenge, http_port);
            let options = IssueOptions {
                strategy: config.strategy,
                ..IssueOptions::default()
            };
            let agent = build_agent(config)?;
            require_backend(&agent, options.strategy)?;
            let scheduler = RenewalScheduler::new(Arc::new(agent), options);

            match interval {
                Some(secs) => {
                    let scheduler = scheduler.with_interval(Duration::from_secs(secs));
                    let shutdown = CancellationToken::new();

                    let signal = shutdown.clone();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            info!("Received Ctrl-C, stopping");
                        }
                        signal.cancel();
                    });

                    scheduler.run(shutdown).await;
                }
                None => {
                    let report = scheduler
                        .check_renewals()
                        .await
                        .context("Renewal check failed")?;

                    info!(
                        checked = report.checked,
                        renewed = report.renewed.len(),
                        failed = report.failed.len(),
                        "Renewal check done"
                    );
                    if !report.failed.is_empty() {
                        for (domain, error) in &report.failed {
                            warn!(domain = %domain, error = %error, "Renewal failed");
                        }
                        bail!("{} certificate(s) failed to renew", report.failed.len());
                    }
                }
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn require_email(email: &Option<String>) -> Result<String> {
    match email.as_deref() {
        Some(email) if !email.trim().is_empty() => Ok(email.to_string()),
        _ => bail!("--email (or ACMEKEEP_EMAIL) is required"),
    }
}

fn apply_challenge_overrides(
    config: &mut AgentConfig,
    strategy: Option<ChallengeStrategy>,
    http_port: Option<u16>,
) {
    if let Some(strategy) = strategy {
        config.strategy = strategy;
    }
    if let Some(port) = http_port {
        config.http.port = port;
    }
}

/// Route53 is wired in when AWS credentials are present in the environment.
/// Bucket-served HTTP-01 needs a bucket client supplied by library callers.
fn build_agent(config: AgentConfig) -> Result<Agent> {
    let blobs = Arc::new(FsBlobStore::new(config.data_dir.clone()));

    let mut backends = ChallengeBackends::default();
    match AwsCredentials::from_env() {
        Ok(credentials) => {
            let client = Route53Client::new(credentials).context("Failed to create Route53 client")?;
            backends.dns = Some(Arc::new(client));
        }
        Err(e) => debug!(reason = %e, "Route53 backend disabled"),
    }

    Ok(Agent::new(config, blobs, backends))
}

/// Refuse a strategy without a backend before anything is sent to the CA
fn require_backend(agent: &Agent, strategy: ChallengeStrategy) -> Result<()> {
    if agent.backends().ensure_supported(strategy).is_err() {
        match strategy {
            ChallengeStrategy::Dns01 => bail!(
                "dns-01 needs Route53 credentials ({ENV_ACCESS_KEY_ID} and {ENV_SECRET_ACCESS_KEY}); \
                 set them or pass --challenge http-01"
            ),
            other => bail!("the {other} challenge has no backend in this binary; pass --challenge http-01"),
        }
    }
    Ok(())
}
