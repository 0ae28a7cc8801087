//! `sealdex` CLI tool for key, fingerprint and search index operations.

#![warn(clippy::pedantic, clippy::nursery)]

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use clap::{Parser, Subcommand, ValueEnum};
use rand::RngCore;
use sealdex::config::Config;
use sealdex::gateway::{document_id, IndexHandle, SearchIndexGateway};
use sealdex::kdf::generate_key;
use sealdex::orchestrator::{index_settings, query_attributes, search_attributes};
use sealdex::record::parts_attribute;
use sealdex::tokens::{extract_tokens, FieldKind};
use sealdex_meili::MeiliGateway;
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sealdex")]
#[command(about = "sealdex encryption and search index CLI", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "sealdex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new encryption key and hash salt
    Keygen,
    /// Print the fingerprint of a value
    Digest {
        /// Plaintext value
        value: String,
    },
    /// Print the search tokens of a value
    Tokens {
        /// Plaintext value
        value: String,
        /// How the value is tokenized
        #[arg(short, long, value_enum, default_value_t = Kind::Text)]
        kind: Kind,
    },
    /// Create the search index of a record type and apply its settings
    InitIndex {
        /// Record type identifier, as in the `[records]` section
        #[arg(short, long)]
        record_type: String,
    },
    /// Show document count and indexing state of a record type's index
    Status {
        /// Record type identifier
        #[arg(short, long)]
        record_type: String,
    },
    /// Query the search index of a record type
    Search {
        /// Record type identifier
        #[arg(short, long)]
        record_type: String,
        /// Restrict the query to one searchable field
        #[arg(short, long)]
        field: Option<String>,
        /// Query text
        query: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Email,
    Phone,
    Text,
}

impl From<Kind> for FieldKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Email => Self::Email,
            Kind::Phone => Self::Phone,
            Kind::Text => Self::Text,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("loading configuration from {}", path.display()))
}

fn gateway(config: &Config) -> Result<MeiliGateway> {
    if !config.search.enabled {
        bail!("search is disabled in configuration");
    }
    MeiliGateway::from_config(&config.search).context("building search gateway")
}

fn keygen() {
    let key = generate_key();
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);

    println!("[encryption]");
    println!("key = \"{}\"", key.expose_secret());
    println!();
    println!("[hashing]");
    println!("salt = \"{}\"", URL_SAFE_NO_PAD.encode(salt));
}

fn init_index(config: &Config, record_type: &str) -> Result<()> {
    let fields = config.record_type(record_type)?;
    let name = config.search.index_name(record_type);
    let settings = index_settings(fields);

    gateway(config)?
        .initialize(&name, &settings, config.search.task_timeout())
        .with_context(|| format!("initializing index {name}"))?;

    println!("index {name} configured");
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn status(config: &Config, record_type: &str) -> Result<()> {
    config.record_type(record_type)?;
    let name = config.search.index_name(record_type);

    let stats = gateway(config)?
        .stats(&IndexHandle::new(name.as_str()))
        .with_context(|| format!("reading stats of index {name}"))?;

    println!("index:      {name}");
    println!("documents:  {}", stats.number_of_documents);
    println!("indexing:   {}", stats.is_indexing);
    Ok(())
}

fn search(config: &Config, record_type: &str, field: Option<&str>, query: &str) -> Result<()> {
    let fields = config.record_type(record_type)?;
    let candidates = match field {
        None => search_attributes(fields),
        Some(field) if fields.effective_searchable().iter().any(|f| f == field) => {
            vec![parts_attribute(field), field.to_string()]
        }
        Some(field) => bail!("field `{field}` is not searchable on `{record_type}`"),
    };
    let attributes = query_attributes(&index_settings(fields), candidates);
    if attributes.is_empty() {
        bail!("index settings of `{record_type}` make none of the requested attributes searchable");
    }
    let name = config.search.index_name(record_type);

    let hits = gateway(config)?
        .query(&IndexHandle::new(name.as_str()), query, &attributes)
        .with_context(|| format!("querying index {name}"))?;

    tracing::debug!(index = %name, hits = hits.len(), "query answered");
    for hit in &hits {
        println!("{}", document_id(hit).unwrap_or_default());
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => keygen(),
        Commands::Digest { value } => {
            let config = load_config(&cli.config)?;
            println!("{}", config.fingerprint().digest(&value));
        }
        Commands::Tokens { value, kind } => {
            for token in extract_tokens(&value, kind.into()) {
                println!("{token}");
            }
        }
        Commands::InitIndex { record_type } => {
            init_index(&load_config(&cli.config)?, &record_type)?;
        }
        Commands::Status { record_type } => {
            status(&load_config(&cli.config)?, &record_type)?;
        }
        Commands::Search { record_type, field, query } => {
            search(&load_config(&cli.config)?, &record_type, field.as_deref(), &query)?;
        }
    }

    Ok(())
}
