use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ksef_core::api::KsefClient;
use ksef_core::certificate::CertificateStore;
use ksef_core::config::{Config, DocumentVersion, Environment};
use ksef_core::invoice::{InvoiceDocument, InvoiceXml, ToXml};
use ksef_core::submit::Submitter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ksef")]
#[command(about = "KSeF e-invoicing client")]
struct Cli {
    /// Target environment: test, demo or production.
    #[arg(long, env = "KSEF_ENV", default_value = "test", global = true)]
    env: Environment,
    /// Long-lived KSeF token (`<prefix>|nip-<NIP>|<suffix>`).
    #[arg(long, env = "KSEF_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,
    /// Override the API host.
    #[arg(long, env = "KSEF_BASE_URL", global = true)]
    base_url: Option<String>,
    /// JSON configuration file; replaces `--env` and `--token`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the FA(2) XML of an invoice without sending it.
    Xml {
        #[arg(long)]
        invoice: PathBuf,
        #[arg(long, default_value = "fa2")]
        version: DocumentVersion,
        #[arg(long)]
        pretty: bool,
    },
    /// Submit invoices and print one JSON record per invoice.
    ///
    /// Repeat `--invoice` to send a batch; the token policy from the config
    /// file decides whether the batch shares one access token.
    Send {
        #[arg(long, required = true)]
        invoice: Vec<PathBuf>,
    },
    /// Re-check the status of an invoice sent earlier.
    Status {
        #[arg(long)]
        session: String,
        #[arg(long)]
        invoice: String,
    },
    /// Download the UPO of a closed session.
    Upo {
        #[arg(long)]
        session: String,
        /// Output file; defaults to `UPO_<session>` with a matching extension.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List the public-key certificates published by the platform.
    Certificates,
}

fn read_invoice(path: &Path) -> Result<InvoiceDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading invoice {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing invoice {}", path.display()))
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => {
            let Some(token) = cli.token.as_deref().filter(|t| !t.trim().is_empty()) else {
                bail!("a KSeF token is required (--token or KSEF_TOKEN)");
            };
            Config::new(cli.env, token)
        }
    };
    Ok(match &cli.base_url {
        Some(url) => config.with_base_url(url),
        None => config,
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Xml {
            invoice,
            version,
            pretty,
        } => {
            let doc = read_invoice(invoice)?;
            let xml = InvoiceXml::new(&doc, *version);
            let xml = if *pretty {
                xml.to_xml_pretty()?
            } else {
                xml.to_xml()?
            };
            println!("{xml}");
        }
        Commands::Send { invoice } => {
            let docs = invoice
                .iter()
                .map(|path| read_invoice(path))
                .collect::<Result<Vec<_>>>()?;
            let mut submitter = Submitter::new(load_config(&cli)?)?;
            for doc in &docs {
                let record = submitter.submit(doc).await?;
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
        }
        Commands::Status { session, invoice } => {
            let mut submitter = Submitter::new(load_config(&cli)?)?;
            let record = submitter.check_status(session, invoice).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Upo { session, out } => {
            let mut submitter = Submitter::new(load_config(&cli)?)?;
            let upo = submitter.session_upo(session).await?;
            let path = out.clone().unwrap_or_else(|| PathBuf::from(upo.file_name()));
            std::fs::write(&path, &upo.content)
                .with_context(|| format!("writing UPO {}", path.display()))?;
            println!("{}", path.display());
        }
        Commands::Certificates => {
            let config = load_config(&cli)?;
            let mut store = CertificateStore::new(KsefClient::new(&config)?);
            store.fetch().await?;
            for usage in store.usages() {
                let cert = store.get(usage);
                println!(
                    "{usage}\t{}",
                    cert.and_then(|c| c.valid_to()).unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}
