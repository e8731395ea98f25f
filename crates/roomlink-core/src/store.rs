//! Encrypted, atomically replaced storage for the current room link.
//!
//! File layout (little-endian):
//!
//! ```text
//!  0..8    magic "RMLINK1\0"
//!  8..12   format version
//! 12..16   algorithm id (1 = XChaCha20-Poly1305)
//! 16..32   key reference
//! 32..56   nonce
//! 56..64   reserved, zero
//! 64..     ciphertext + tag
//! ```
//!
//! Bytes 0..16 are the sealing context; the key reference and nonce are
//! bound as associated data alongside it, and the reserved bytes must be zero.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::codec::LinkCodec;
use crate::crypto::{KEY_REFERENCE_LEN, NONCE_LEN, TAG_LEN};
use crate::error::{LinkError, Result};
use crate::keystore::Keystore;
use crate::link::CanonicalUrl;

pub const STORE_MAGIC: &[u8; 8] = b"RMLINK1\0";
pub const STORE_FORMAT_VERSION: u32 = 1;
pub const ALGORITHM_XCHACHA20_POLY1305: u32 = 1;
pub const HEADER_SIZE: usize = 64;
pub const CONTEXT_SIZE: usize = 16;
pub const LINK_FILE: &str = "current-link.bin";

/// Persisted, sealed form of the current link.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredSecret {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub key_reference: [u8; KEY_REFERENCE_LEN],
}

impl std::fmt::Debug for StoredSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredSecret")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("key_reference", &hex::encode(self.key_reference))
            .finish()
    }
}

impl StoredSecret {
    pub(crate) fn associated_data(
        context: &[u8],
        key_reference: &[u8; KEY_REFERENCE_LEN],
        nonce: &[u8; NONCE_LEN],
    ) -> Vec<u8> {
        let mut aad = Vec::with_capacity(context.len() + KEY_REFERENCE_LEN + NONCE_LEN);
        aad.extend_from_slice(context);
        aad.extend_from_slice(key_reference);
        aad.extend_from_slice(nonce);
        aad
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[..CONTEXT_SIZE].copy_from_slice(&sealing_context());
        buf[16..32].copy_from_slice(&self.key_reference);
        buf[32..56].copy_from_slice(&self.nonce);
        // 56..64 stay zero
        buf.extend_from_slice(&self.ciphertext);
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE + TAG_LEN {
            return Err(corrupt("file too short to hold a sealed link"));
        }
        if &buf[..8] != STORE_MAGIC {
            return Err(corrupt("invalid magic"));
        }
        let version = u32::from_le_bytes(word(&buf[8..12]));
        if version != STORE_FORMAT_VERSION {
            return Err(corrupt(&format!("unsupported format version {version}")));
        }
        let algorithm = u32::from_le_bytes(word(&buf[12..16]));
        if algorithm != ALGORITHM_XCHACHA20_POLY1305 {
            return Err(corrupt(&format!("unsupported algorithm {algorithm}")));
        }
        if buf[56..HEADER_SIZE].iter().any(|b| *b != 0) {
            return Err(corrupt("reserved header bytes set"));
        }
        let mut key_reference = [0u8; KEY_REFERENCE_LEN];
        key_reference.copy_from_slice(&buf[16..32]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&buf[32..56]);
        Ok(Self {
            ciphertext: buf[HEADER_SIZE..].to_vec(),
            nonce,
            key_reference,
        })
    }
}

fn word(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(bytes);
    out
}

fn sealing_context() -> [u8; CONTEXT_SIZE] {
    let mut ctx = [0u8; CONTEXT_SIZE];
    ctx[..8].copy_from_slice(STORE_MAGIC);
    ctx[8..12].copy_from_slice(&STORE_FORMAT_VERSION.to_le_bytes());
    ctx[12..16].copy_from_slice(&ALGORITHM_XCHACHA20_POLY1305.to_le_bytes());
    ctx
}

fn corrupt(reason: &str) -> LinkError {
    LinkError::CorruptStore(reason.to_owned())
}

/// Plaintext inside the sealed blob.
#[derive(Serialize, Deserialize)]
struct LinkRecord {
    url: String,
    saved_at: DateTime<Utc>,
}

impl Drop for LinkRecord {
    fn drop(&mut self) {
        self.url.zeroize();
    }
}

pub struct SecretStore {
    path: PathBuf,
    keystore: Arc<dyn Keystore>,
    codec: LinkCodec,
}

impl SecretStore {
    pub fn new(data_dir: &Path, keystore: Arc<dyn Keystore>, codec: LinkCodec) -> Self {
        Self::at_path(data_dir.join(LINK_FILE), keystore, codec)
    }

    pub fn at_path(path: PathBuf, keystore: Arc<dyn Keystore>, codec: LinkCodec) -> Self {
        Self {
            path,
            keystore,
            codec,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<CanonicalUrl>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored link");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let sealed = StoredSecret::from_bytes(&raw)?;
        let plaintext = self.keystore.open(&sealed, &sealing_context())?;
        let record: LinkRecord = serde_json::from_slice(&plaintext)
            .map_err(|e| corrupt(&format!("record: {:?} error", e.classify())))?;
        let url = self.codec.parse(&record.url)?;
        debug!(
            path = %self.path.display(),
            key_reference = %hex::encode(sealed.key_reference),
            saved_at = %record.saved_at,
            "stored link loaded"
        );
        Ok(Some(url))
    }

    pub fn save(&self, url: &CanonicalUrl) -> Result<()> {
        // Reject anything this codec would not load back.
        self.codec.decode(url)?;
        let record = LinkRecord {
            url: url.as_str().to_owned(),
            saved_at: Utc::now(),
        };
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&record).map_err(|e| corrupt(&format!("encode record: {e}")))?,
        );
        let sealed = self.keystore.seal(&plaintext, &sealing_context())?;
        self.write_atomic(&sealed.to_bytes())?;
        info!(
            path = %self.path.display(),
            keystore = self.keystore.backend_name(),
            key_reference = %hex::encode(sealed.key_reference),
            "stored link saved"
        );
        Ok(())
    }

    /// Moves an unreadable link file aside so a replacement never overwrites
    /// it. Returns where it went, or `None` if there was no file.
    pub fn preserve_unreadable(&self) -> Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let dest = corrupt_sibling(&self.path);
        fs::rename(&self.path, &dest)?;
        warn!(from = %self.path.display(), to = %dest.display(), "unreadable link file preserved");
        Ok(Some(dest))
    }

    fn write_atomic(&self, bytes: &[u8]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        ensure_private_dir(dir)?;

        // Staging file lives next to the target so the rename stays on one
        // filesystem; tempfile creates it with owner-only permissions.
        let mut staging = NamedTempFile::new_in(dir)?;
        staging.write_all(bytes)?;
        staging.as_file().sync_all()?;
        staging
            .persist(&self.path)
            .map_err(|e| LinkError::Io(e.error))?;
        fsync_dir(dir)?;
        Ok(())
    }
}

/// `<file>.corrupt-<timestamp>` next to `path`.
pub(crate) fn corrupt_sibling(path: &Path) -> PathBuf {
    let ts = Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| LINK_FILE.to_string());
    path.with_file_name(format!("{file_name}.corrupt-{ts}"))
}

/// Creates `dir` if missing and restricts it to the owner. A directory that
/// already exists belongs to whoever made it and keeps its permissions.
pub(crate) fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    restrict_dir_permissions(dir);
    Ok(())
}

fn restrict_dir_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
}

fn fsync_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir: File = OpenOptions::new().read(true).open(path)?;
        dir.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
