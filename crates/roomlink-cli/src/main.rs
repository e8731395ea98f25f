use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use roomlink_core::paths;
use roomlink_core::settings::SETTINGS_FILE;
use roomlink_core::{KeystoreBackend, LinkCommands, LinkManager, LinkSettings};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "roomlink")]
#[command(about = "Manage the encrypted room link shown in the call window", long_about = None)]
struct Cli {
    /// Directory holding the encrypted link (default: platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Where the master key lives (default: from settings.json)
    #[arg(long, global = true, value_enum)]
    keystore: Option<KeystoreArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KeystoreArg {
    Keyring,
    File,
}

impl From<KeystoreArg> for KeystoreBackend {
    fn from(arg: KeystoreArg) -> Self {
        match arg {
            KeystoreArg::Keyring => KeystoreBackend::Keyring,
            KeystoreArg::File => KeystoreBackend::File,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current link, creating one if none is stored
    Get {
        /// Print a JSON object including any recovery notice
        #[arg(long)]
        json: bool,
    },

    /// Replace the current link with a freshly generated one
    Regenerate,

    /// Store a link built from your own identifiers
    Set {
        /// Push ID (room name)
        push_id: String,

        /// Audience key; omit for no separate viewer key
        #[arg(default_value = "")]
        audience: String,
    },

    /// Show where settings and the encrypted link are kept
    Where,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config_dir = paths::config_dir()?;
    let mut settings = LinkSettings::load_or_default(&config_dir)
        .with_context(|| format!("load settings from {}", config_dir.display()))?;
    if let Some(backend) = cli.keystore {
        settings.keystore = backend.into();
    }
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => paths::data_dir()?,
    };

    tracing::debug!(data_dir = %data_dir.display(), keystore = ?settings.keystore, "opening link manager");
    let manager = LinkManager::open(&settings, &data_dir)?;
    let commands = LinkCommands::new(Arc::new(manager));

    match cli.command {
        Commands::Get { json } => {
            let response = commands.get_or_create_link().map_err(|e| anyhow!(e))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                if let Some(notice) = &response.notice {
                    eprintln!("{notice}");
                }
                println!("{}", response.url);
            }
        }
        Commands::Regenerate => {
            let url = commands.regenerate_link().map_err(|e| anyhow!(e))?;
            println!("{url}");
        }
        Commands::Set { push_id, audience } => {
            commands
                .set_manual_link(&push_id, &audience)
                .map_err(|e| anyhow!(e))?;
            if let Some(url) = commands.current_link() {
                println!("{url}");
            }
        }
        Commands::Where => {
            println!("settings: {}", config_dir.join(SETTINGS_FILE).display());
            println!("link:     {}", commands.manager().store_path().display());
            println!("keystore: {:?}", settings.keystore);
        }
    }
    Ok(())
}
