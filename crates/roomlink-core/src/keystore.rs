//! Master secret custody.
//!
//! The keystore owns a 32-byte master secret that never leaves the process
//! except through the platform store that holds it. The link sealing key is
//! derived from it with HKDF, so rotating the master secret invalidates every
//! stored link (which the manager answers by regenerating).

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use keyring::Entry;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{
    decrypt, derive_store_key, encrypt, generate_master_secret, generate_nonce, key_reference,
    KEY_LEN,
};
use crate::error::{LinkError, Result};
use crate::settings::KeystoreBackend;
use crate::store::{corrupt_sibling, ensure_private_dir, StoredSecret};

pub const SERVICE_NAME: &str = "RoomLink";
pub const MASTER_KEY_ACCOUNT: &str = "link-master-key";
pub const KEY_FILE: &str = "master.key";

/// Platform secret capability: key custody plus sealing.
pub trait Keystore: Send + Sync {
    /// Returns the master secret, creating and persisting it on first use.
    fn get_or_create_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>>;

    fn backend_name(&self) -> &'static str;

    /// Encrypts `plaintext` under a fresh nonce. `context` and the returned
    /// key reference and nonce are all authenticated.
    fn seal(&self, plaintext: &[u8], context: &[u8]) -> Result<StoredSecret> {
        let master = self.get_or_create_key()?;
        let key = derive_store_key(master.as_slice())?;
        let key_reference = key_reference(&key);
        let nonce = generate_nonce()?;
        let aad = StoredSecret::associated_data(context, &key_reference, &nonce);
        let ciphertext = encrypt(&key, &nonce, plaintext, &aad)?;
        Ok(StoredSecret {
            ciphertext,
            nonce,
            key_reference,
        })
    }

    fn open(&self, sealed: &StoredSecret, context: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let master = self.get_or_create_key()?;
        let key = derive_store_key(master.as_slice())?;
        if key_reference(&key) != sealed.key_reference {
            debug!(
                stored = %hex::encode(sealed.key_reference),
                "stored link was sealed under a different key"
            );
            return Err(LinkError::DecryptionFailed);
        }
        let aad = StoredSecret::associated_data(context, &sealed.key_reference, &sealed.nonce);
        decrypt(&key, &sealed.nonce, &sealed.ciphertext, &aad)
    }
}

/// Builds the keystore selected in settings.
pub fn open_keystore(backend: KeystoreBackend, data_dir: &Path) -> Arc<dyn Keystore> {
    match backend {
        KeystoreBackend::Keyring => Arc::new(KeyringKeystore::new(MASTER_KEY_ACCOUNT)),
        KeystoreBackend::File => Arc::new(FileKeystore::new(data_dir.join(KEY_FILE))),
    }
}

fn decode_master(encoded: &str) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let bytes = Zeroizing::new(
        general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| LinkError::Keystore(format!("decode master key: {e}")))?,
    );
    to_key(&bytes)
}

fn to_key(bytes: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    if bytes.len() != KEY_LEN {
        return Err(LinkError::Keystore("master key length invalid".into()));
    }
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(bytes);
    Ok(key)
}

/// OS credential store (Keychain, Credential Manager, Secret Service).
pub struct KeyringKeystore {
    account: String,
    cached: Mutex<Option<Zeroizing<[u8; KEY_LEN]>>>,
}

impl KeyringKeystore {
    pub fn new(account: &str) -> Self {
        Self {
            account: account.to_owned(),
            cached: Mutex::new(None),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account)
            .map_err(|e| LinkError::Keystore(format!("keyring init: {e}")))
    }

    fn create_key(&self, entry: &Entry) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let key = generate_master_secret()?;
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(key.as_slice()));
        entry
            .set_password(&encoded)
            .map_err(|e| LinkError::Keystore(format!("store master key: {e}")))?;
        info!(account = %self.account, "created master key in OS keyring");
        Ok(key)
    }

    /// Copies an unusable entry to a timestamped sibling account before it
    /// is overwritten. Best effort: failure only costs the forensic copy.
    fn preserve_unusable(&self, encoded: &str) {
        let ts = Utc::now().format("%Y%m%dT%H%M%S");
        let account = format!("{}.corrupt-{ts}", self.account);
        let saved = Entry::new(SERVICE_NAME, &account).and_then(|e| e.set_password(encoded));
        if let Err(e) = saved {
            warn!(account = %account, error = %e, "cannot preserve unusable keyring entry");
        }
    }
}

impl Keystore for KeyringKeystore {
    fn get_or_create_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let mut cached = self.cached.lock();
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }
        let entry = self.entry()?;
        let key = match entry.get_password() {
            Ok(encoded) => {
                let encoded = Zeroizing::new(encoded);
                match decode_master(&encoded) {
                    Ok(key) => key,
                    Err(e) => {
                        self.preserve_unusable(&encoded);
                        warn!(
                            account = %self.account,
                            error = %e,
                            "keyring master key unusable, replacing it"
                        );
                        self.create_key(&entry)?
                    }
                }
            }
            Err(keyring::Error::NoEntry) => self.create_key(&entry)?,
            Err(e) => return Err(LinkError::Keystore(format!("load master key: {e}"))),
        };
        *cached = Some(key.clone());
        Ok(key)
    }

    fn backend_name(&self) -> &'static str {
        "keyring"
    }
}

/// Machine-bound key file readable only by the owning user.
pub struct FileKeystore {
    path: PathBuf,
    cached: Mutex<Option<Zeroizing<[u8; KEY_LEN]>>>,
}

impl FileKeystore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when there is no usable key file. An unusable one is moved
    /// aside so a fresh key can take its place.
    fn read_key(&self) -> Result<Option<Zeroizing<[u8; KEY_LEN]>>> {
        let mut bytes = Zeroizing::new(Vec::with_capacity(KEY_LEN));
        match fs::File::open(&self.path) {
            Ok(mut file) => {
                file.read_to_end(&mut bytes)?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        match to_key(&bytes) {
            Ok(key) => Ok(Some(key)),
            Err(e) => {
                let dest = corrupt_sibling(&self.path);
                fs::rename(&self.path, &dest)?;
                warn!(
                    error = %e,
                    preserved = %dest.display(),
                    "master key file unusable, replacing it"
                );
                Ok(None)
            }
        }
    }

    /// Stages the key next to its final path and links it in without
    /// overwriting, so readers never see a partial file. `None` means another
    /// process installed its key first.
    fn create_key(&self) -> Result<Option<Zeroizing<[u8; KEY_LEN]>>> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        ensure_private_dir(dir)?;

        let key = generate_master_secret()?;
        // tempfile creates the staging file owner-only (0600 on unix).
        let mut staging = NamedTempFile::new_in(dir)?;
        staging.write_all(key.as_slice())?;
        staging.as_file().sync_all()?;
        match staging.persist_noclobber(&self.path) {
            Ok(_) => {
                info!(path = %self.path.display(), "created master key file");
                Ok(Some(key))
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.error.into()),
        }
    }
}

impl Keystore for FileKeystore {
    fn get_or_create_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let mut cached = self.cached.lock();
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }
        let key = match self.read_key()? {
            Some(key) => key,
            None => match self.create_key()? {
                Some(key) => key,
                None => self
                    .read_key()?
                    .ok_or_else(|| LinkError::Keystore("master key file unusable".into()))?,
            },
        };
        *cached = Some(key.clone());
        Ok(key)
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

/// In-process keystore for tests and ephemeral sessions. Clones share the
/// same secret.
#[derive(Clone, Default)]
pub struct MemoryKeystore {
    secret: Arc<Mutex<Option<Zeroizing<[u8; KEY_LEN]>>>>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(secret: [u8; KEY_LEN]) -> Self {
        Self {
            secret: Arc::new(Mutex::new(Some(Zeroizing::new(secret)))),
        }
    }
}

impl Keystore for MemoryKeystore {
    fn get_or_create_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let mut guard = self.secret.lock();
        if let Some(key) = guard.as_ref() {
            return Ok(key.clone());
        }
        let key = generate_master_secret()?;
        *guard = Some(key.clone());
        Ok(key)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CONTEXT: &[u8] = b"test-context";

    #[test]
    fn memory_keystore_seals_and_opens() {
        let ks = MemoryKeystore::new();
        let sealed = ks.seal(b"secret", CONTEXT).unwrap();
        assert_eq!(ks.open(&sealed, CONTEXT).unwrap().as_slice(), b"secret");
    }

    #[test]
    fn every_seal_uses_a_fresh_nonce() {
        let ks = MemoryKeystore::new();
        let a = ks.seal(b"secret", CONTEXT).unwrap();
        let b = ks.seal(b"secret", CONTEXT).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(a.key_reference, b.key_reference);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let sealed = MemoryKeystore::with_secret([1; KEY_LEN])
            .seal(b"secret", CONTEXT)
            .unwrap();
        let other = MemoryKeystore::with_secret([2; KEY_LEN]);
        assert!(matches!(
            other.open(&sealed, CONTEXT),
            Err(LinkError::DecryptionFailed)
        ));
    }

    #[test]
    fn context_is_bound() {
        let ks = MemoryKeystore::new();
        let sealed = ks.seal(b"secret", CONTEXT).unwrap();
        assert!(matches!(
            ks.open(&sealed, b"other-context"),
            Err(LinkError::DecryptionFailed)
        ));
    }

    #[test]
    fn file_keystore_persists_master_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys").join(KEY_FILE);
        let first = FileKeystore::new(path.clone());
        let key = first.get_or_create_key().unwrap();
        let second = FileKeystore::new(path.clone());
        assert_eq!(*key, *second.get_or_create_key().unwrap());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn file_keystore_replaces_truncated_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(KEY_FILE);
        fs::write(&path, b"short").unwrap();

        let key = FileKeystore::new(path.clone()).get_or_create_key().unwrap();
        assert_eq!(fs::read(&path).unwrap(), key.as_slice());
        assert_eq!(*FileKeystore::new(path).get_or_create_key().unwrap(), *key);

        let preserved: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(preserved.len(), 1);
        assert_eq!(fs::read(&preserved[0]).unwrap(), b"short");
    }

    #[test]
    fn concurrent_file_keystores_agree_on_one_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys").join(KEY_FILE);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || *FileKeystore::new(path).get_or_create_key().unwrap())
            })
            .collect();
        let keys: Vec<[u8; KEY_LEN]> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(fs::read(&path).unwrap(), keys[0]);
    }

    #[test]
    fn master_key_encoding_round_trips() {
        let key = [7u8; KEY_LEN];
        let encoded = general_purpose::STANDARD.encode(key);
        assert_eq!(*decode_master(&encoded).unwrap(), key);
        assert!(decode_master("not base64!").is_err());
    }
}
