//! secenv CLI - Command line interface for encrypted env files.
//!
//! This tool encrypts `.env` files into `.sec` files and back, manages the
//! local keyring, and converts structured secret trees.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use secenv_common::Error;
use secenv_crypto::{create_default_registry, Keyring};
use secenv_document::{SecenvConfig, SecretFileEngine};
use secenv_tree::{FlatTree, Leaf, SecretTree};

#[derive(Parser)]
#[command(name = "secenv")]
#[command(about = "secenv - Encrypted env files")]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/secenv/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a keyring with one key and a config using it.
    Init {
        /// Keyring file to create.
        #[arg(short, long)]
        keyring: PathBuf,

        /// Overwrite an existing config.
        #[arg(long)]
        force: bool,
    },

    /// Add a new key to a keyring.
    Keygen {
        /// Keyring file; created if missing.
        #[arg(short, long)]
        keyring: PathBuf,
    },

    /// Encrypt a .env file into a .sec file.
    Encrypt {
        /// Plaintext .env file.
        #[arg(short, long)]
        input: PathBuf,

        /// Encrypted output file.
        #[arg(short, long)]
        output: PathBuf,

        /// Previous .sec file whose unchanged values are kept
        /// (default: the existing output).
        #[arg(short, long)]
        previous: Option<PathBuf>,
    },

    /// Decrypt a .sec file into a .env file.
    Decrypt {
        /// Encrypted .sec file.
        #[arg(short, long)]
        input: PathBuf,

        /// Plaintext output file.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Flatten a JSON secret tree into path-keyed JSON.
    Flatten {
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Expand path-keyed JSON into a secret tree.
    Expand {
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print shell completions.
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match cli.config {
        Some(path) => path,
        None => SecenvConfig::default_path()?,
    };

    match cli.command {
        Commands::Init { keyring, force } => cmd_init(&config_path, &keyring, force).await,

        Commands::Keygen { keyring } => cmd_keygen(&keyring),

        Commands::Encrypt {
            input,
            output,
            previous,
        } => cmd_encrypt(&config_path, &input, &output, previous.as_deref()).await,

        Commands::Decrypt { input, output } => cmd_decrypt(&config_path, &input, &output).await,

        Commands::Flatten { input, output } => cmd_flatten(&input, output.as_deref()).await,

        Commands::Expand { input, output } => cmd_expand(&input, output.as_deref()).await,

        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "secenv", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Create a keyring and a config pointing at it.
async fn cmd_init(config_path: &Path, keyring_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    }
    if keyring_path.exists() {
        anyhow::bail!("Keyring already exists at {}", keyring_path.display());
    }

    let mut keyring = Keyring::new();
    let key_id = keyring.generate_key().context("Failed to generate key")?;
    keyring
        .save(keyring_path)
        .context("Failed to write keyring")?;

    let config = SecenvConfig::new(
        "local",
        serde_json::json!({ "keyring": keyring_path.to_string_lossy() }),
        key_id.clone(),
    );
    config
        .save(config_path)
        .await
        .context("Failed to write config")?;

    println!("Initialized secenv");
    println!("  Key: {}", key_id);
    println!("  Keyring: {}", keyring_path.display());
    println!("  Config: {}", config_path.display());

    Ok(())
}

/// Add a key to a keyring.
fn cmd_keygen(keyring_path: &Path) -> Result<()> {
    let mut keyring = if keyring_path.exists() {
        Keyring::load(keyring_path).context("Failed to read keyring")?
    } else {
        Keyring::new()
    };

    let key_id = keyring.generate_key().context("Failed to generate key")?;
    keyring
        .save(keyring_path)
        .context("Failed to write keyring")?;

    info!(keys = keyring.key_ids().len(), "Keyring updated");
    println!("{}", key_id);

    Ok(())
}

async fn load_engine(config_path: &Path) -> Result<SecretFileEngine> {
    let config = match SecenvConfig::load(config_path).await {
        Ok(config) => config,
        Err(Error::NotFound(_)) => anyhow::bail!(
            "No config at {}; run `secenv init` first",
            config_path.display()
        ),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to load config {}", config_path.display()))
        }
    };

    let registry = create_default_registry()?;
    let provider = config
        .build_provider(&registry)
        .with_context(|| format!("Failed to set up provider '{}'", config.provider_type))?;

    debug!(provider = provider.name(), key_id = %config.key_id, "Using provider");
    Ok(SecretFileEngine::new(provider, config.engine_options()))
}

/// Encrypt a .env file.
async fn cmd_encrypt(
    config_path: &Path,
    input: &Path,
    output: &Path,
    previous: Option<&Path>,
) -> Result<()> {
    let engine = load_engine(config_path).await?;

    let plaintext = read_text(input).await?;
    let previous = match previous {
        Some(path) => Some(read_text(path).await?),
        None if output.exists() => Some(read_text(output).await?),
        None => None,
    };

    let ciphertext = engine
        .encrypt(&plaintext, previous.as_deref())
        .await
        .with_context(|| format!("Failed to encrypt {}", input.display()))?;

    write_atomic(output, &ciphertext).await?;
    println!("Encrypted {} -> {}", input.display(), output.display());

    Ok(())
}

/// Decrypt a .sec file.
async fn cmd_decrypt(config_path: &Path, input: &Path, output: &Path) -> Result<()> {
    let engine = load_engine(config_path).await?;

    let ciphertext = read_text(input).await?;
    let plaintext = engine
        .decrypt(&ciphertext)
        .await
        .with_context(|| format!("Failed to decrypt {}", input.display()))?;

    write_atomic(output, &plaintext).await?;
    println!("Decrypted {} -> {}", input.display(), output.display());

    Ok(())
}

/// Flatten a secret tree file.
async fn cmd_flatten(input: &Path, output: Option<&Path>) -> Result<()> {
    let value = read_json(input).await?;
    let tree = SecretTree::from_value(value).context("Invalid secret tree")?;
    tree.validate().context("Invalid secret tree")?;

    let flat = flat_to_value(&tree.flatten())?;
    info!(leaves = tree.leaf_count(), "Flattened secret tree");
    emit_json(&flat, output).await
}

/// Expand a flat secret file.
async fn cmd_expand(input: &Path, output: Option<&Path>) -> Result<()> {
    let value = read_json(input).await?;
    let flat = flat_from_value(value)?;
    let tree = SecretTree::expand(&flat).context("Failed to expand secret tree")?;

    info!(leaves = flat.len(), "Expanded secret tree");
    emit_json(&tree.to_value()?, output).await
}

fn flat_to_value(flat: &FlatTree) -> Result<Value> {
    let mut object = Map::new();
    for (key, leaf) in flat {
        object.insert(key.clone(), leaf.to_value()?);
    }
    Ok(Value::Object(object))
}

fn flat_from_value(value: Value) -> Result<FlatTree> {
    let Value::Object(object) = value else {
        anyhow::bail!("Flat secrets must be a JSON object");
    };

    let mut flat = FlatTree::new();
    for (key, value) in object {
        let leaf = Leaf::from_value(value).with_context(|| format!("Invalid leaf '{}'", key))?;
        flat.insert(key, leaf);
    }
    Ok(flat)
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

async fn read_json(path: &Path) -> Result<Value> {
    let text = read_text(path).await?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

async fn emit_json(value: &Value, output: Option<&Path>) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    match output {
        Some(path) => write_atomic(path, &json).await,
        None => {
            print!("{}", json);
            Ok(())
        }
    }
}

/// Replace `path` with `contents` through a temporary sibling file.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Not a file path: {}", path.display()))?;
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(".tmp");
    let temp = path.with_file_name(temp_name);

    tokio::fs::write(&temp, contents)
        .await
        .with_context(|| format!("Failed to write {}", temp.display()))?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
    }

    debug!(path = %path.display(), bytes = contents.len(), "Wrote file");
    Ok(())
}
