//! roomlink-core: the secure link manager behind the call window.
//!
//! # Module layout
//! - `ids`       — CSPRNG identifiers for the push and audience roles
//! - `codec`     — canonical room URL encode/decode
//! - `crypto`    — XChaCha20-Poly1305 and HKDF helpers
//! - `keystore`  — master secret custody (OS keyring, key file, memory)
//! - `store`     — encrypted, atomically written link file
//! - `channel`   — link change broadcast
//! - `manager`   — the `Empty -> Present` link slot
//! - `commands`  — string-typed command surface for display layers
//! - `settings`, `paths` — configuration and directories

pub mod channel;
pub mod codec;
pub mod commands;
pub mod crypto;
pub mod error;
pub mod ids;
pub mod keystore;
pub mod link;
pub mod manager;
pub mod paths;
pub mod settings;
pub mod store;

pub use channel::{ChangeCause, ChangeEvent, LinkChannel, LinkSubscription};
pub use codec::LinkCodec;
pub use commands::{LinkCommands, LinkResponse};
pub use error::{LinkError, Result};
pub use ids::IdentifierGenerator;
pub use keystore::{FileKeystore, Keystore, KeyringKeystore, MemoryKeystore};
pub use link::{CanonicalUrl, RoomLink};
pub use manager::{EnsuredLink, LinkManager, LinkState};
pub use settings::{KeystoreBackend, LinkSettings};
pub use store::{SecretStore, StoredSecret};
