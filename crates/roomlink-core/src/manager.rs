//! Orchestrates the link slot: `Empty -> Present`, then whole-value
//! replacements.
//!
//! Mutations are serialized by one lock spanning validation, encryption and
//! the atomic write. The slot revision and in-memory cache are updated under
//! that lock; the broadcast happens after it is released.

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::channel::{ChangeCause, ChangeEvent, LinkChannel, LinkSubscription};
use crate::codec::LinkCodec;
use crate::error::{LinkError, Result};
use crate::ids::IdentifierGenerator;
use crate::keystore::open_keystore;
use crate::link::{CanonicalUrl, RoomLink};
use crate::settings::LinkSettings;
use crate::store::SecretStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Empty,
    Present,
}

/// Result of [`LinkManager::ensure_link`].
#[derive(Debug)]
pub struct EnsuredLink {
    pub url: CanonicalUrl,
    /// `None` when the link was already present in memory.
    pub caused_by: Option<ChangeCause>,
    /// Stored link that could not be read and was replaced.
    pub discarded: Option<LinkError>,
    /// Where the unreadable file was moved.
    pub preserved_at: Option<PathBuf>,
}

struct Writer {
    store: SecretStore,
    seq: u64,
}

pub struct LinkManager {
    writer: Mutex<Writer>,
    current: RwLock<Option<CanonicalUrl>>,
    codec: LinkCodec,
    ids: IdentifierGenerator,
    channel: LinkChannel,
    store_path: PathBuf,
}

impl LinkManager {
    pub fn new(
        store: SecretStore,
        codec: LinkCodec,
        ids: IdentifierGenerator,
        channel: LinkChannel,
    ) -> Self {
        let store_path = store.path().to_path_buf();
        Self {
            writer: Mutex::new(Writer { store, seq: 0 }),
            current: RwLock::new(None),
            codec,
            ids,
            channel,
            store_path,
        }
    }

    /// Wires the production components described by `settings`.
    pub fn open(settings: &LinkSettings, data_dir: &Path) -> Result<Self> {
        let codec = LinkCodec::new(&settings.base_endpoint)?;
        let keystore = open_keystore(settings.keystore, data_dir);
        let store = SecretStore::new(data_dir, keystore, codec.clone());
        Ok(Self::new(
            store,
            codec,
            IdentifierGenerator::new(settings.identifier_bits),
            LinkChannel::new(settings.channel_capacity),
        ))
    }

    pub fn state(&self) -> LinkState {
        if self.current.read().is_some() {
            LinkState::Present
        } else {
            LinkState::Empty
        }
    }

    /// Last known link, without touching the store or the write lock.
    pub fn current_link(&self) -> Option<CanonicalUrl> {
        self.current.read().clone()
    }

    pub fn subscribe(&self) -> LinkSubscription {
        self.channel.subscribe()
    }

    pub fn channel(&self) -> &LinkChannel {
        &self.channel
    }

    pub fn codec(&self) -> &LinkCodec {
        &self.codec
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Moves the slot to `Present`, loading the stored link or creating one.
    /// Idempotent once present.
    pub fn ensure_link(&self) -> Result<EnsuredLink> {
        if let Some(url) = self.current_link() {
            return Ok(EnsuredLink::already_present(url));
        }

        let mut writer = self.writer.lock();
        // Another caller may have finished the transition while we waited.
        if let Some(url) = self.current_link() {
            return Ok(EnsuredLink::already_present(url));
        }

        let mut discarded = None;
        let mut preserved_at = None;
        let event = match writer.store.load() {
            Ok(Some(url)) => self.commit(&mut writer, url, ChangeCause::Loaded)?,
            Ok(None) => {
                let url = self.fresh_url()?;
                self.commit(&mut writer, url, ChangeCause::Generated)?
            }
            Err(e) if e.is_recoverable_store_error() => {
                warn!(error = %e, "stored link unusable, generating a new one");
                preserved_at = writer.store.preserve_unreadable()?;
                discarded = Some(e);
                let url = self.fresh_url()?;
                self.commit(&mut writer, url, ChangeCause::Generated)?
            }
            Err(e) => return Err(e),
        };
        drop(writer);

        self.channel.publish(event.clone());
        Ok(EnsuredLink {
            url: event.url,
            caused_by: Some(event.caused_by),
            discarded,
            preserved_at,
        })
    }

    /// Replaces the current link with a freshly generated one.
    pub fn generate_new_link(&self) -> Result<CanonicalUrl> {
        let mut writer = self.writer.lock();
        let url = self.fresh_url()?;
        let event = self.commit(&mut writer, url, ChangeCause::Generated)?;
        drop(writer);

        self.channel.publish(event.clone());
        Ok(event.url)
    }

    /// Replaces the current link with caller-supplied identifiers. An empty
    /// `audience` means no separate viewer key.
    pub fn set_manual_link(&self, push_id: &str, audience: &str) -> Result<CanonicalUrl> {
        let mut writer = self.writer.lock();
        let link = RoomLink::new(push_id, audience)?;
        let url = self.codec.encode(&link);
        let event = self.commit(&mut writer, url, ChangeCause::ManualSet)?;
        drop(writer);

        self.channel.publish(event.clone());
        Ok(event.url)
    }

    fn fresh_url(&self) -> Result<CanonicalUrl> {
        let link = self.ids.new_room_link()?;
        Ok(self.codec.encode(&link))
    }

    /// Persists (unless the value came from the store), then advances the
    /// revision and cache. Nothing changes if the write fails.
    fn commit(
        &self,
        writer: &mut Writer,
        url: CanonicalUrl,
        cause: ChangeCause,
    ) -> Result<ChangeEvent> {
        if cause != ChangeCause::Loaded {
            writer.store.save(&url)?;
        }
        writer.seq += 1;
        *self.current.write() = Some(url.clone());
        info!(seq = writer.seq, ?cause, "current link updated");
        Ok(ChangeEvent {
            url,
            caused_by: cause,
            seq: writer.seq,
        })
    }
}

impl EnsuredLink {
    fn already_present(url: CanonicalUrl) -> Self {
        Self {
            url,
            caused_by: None,
            discarded: None,
            preserved_at: None,
        }
    }
}
