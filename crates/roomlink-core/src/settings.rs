use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{LinkCodec, DEFAULT_BASE_ENDPOINT};
use crate::ids::{DEFAULT_IDENTIFIER_BITS, MAX_IDENTIFIER_BITS, MIN_IDENTIFIER_BITS};

pub const SETTINGS_FILE: &str = "settings.json";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeystoreBackend {
    Keyring,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LinkSettings {
    pub base_endpoint: String,
    pub identifier_bits: usize,
    pub channel_capacity: usize,
    pub keystore: KeystoreBackend,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            base_endpoint: DEFAULT_BASE_ENDPOINT.into(),
            identifier_bits: DEFAULT_IDENTIFIER_BITS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            keystore: KeystoreBackend::Keyring,
        }
    }
}

impl LinkSettings {
    /// Reads `settings.json` from `config_dir`; a missing file yields defaults.
    pub fn load_or_default(config_dir: &Path) -> anyhow::Result<Self> {
        let path = config_dir.join(SETTINGS_FILE);
        let settings = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<LinkSettings>(&bytes)
                .map_err(|e| anyhow::anyhow!("parse {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                LinkSettings::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read {}: {e}", path.display())),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        LinkCodec::new(&self.base_endpoint)?;
        if !(MIN_IDENTIFIER_BITS..=MAX_IDENTIFIER_BITS).contains(&self.identifier_bits) {
            anyhow::bail!(
                "identifier_bits must be between {MIN_IDENTIFIER_BITS} and {MAX_IDENTIFIER_BITS}"
            );
        }
        if self.channel_capacity == 0 {
            anyhow::bail!("channel_capacity must be positive");
        }
        Ok(())
    }
}
