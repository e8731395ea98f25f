//! Random identifiers for the push and audience roles.
//!
//! Identifiers are raw CSPRNG bytes rendered in unpadded base64url, so every
//! character is in the URL unreserved set.

use base64::{engine::general_purpose, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{LinkError, Result};
use crate::link::RoomLink;

pub const MIN_IDENTIFIER_BITS: usize = 120;
pub const MAX_IDENTIFIER_BITS: usize = 512;
pub const DEFAULT_IDENTIFIER_BITS: usize = 128;

/// Source of cryptographically secure random bytes.
pub trait EntropySource: Send + Sync {
    fn try_fill(&self, dest: &mut [u8]) -> std::result::Result<(), rand_core::Error>;
}

/// Operating system RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn try_fill(&self, dest: &mut [u8]) -> std::result::Result<(), rand_core::Error> {
        OsRng.try_fill_bytes(dest)
    }
}

pub struct IdentifierGenerator {
    source: Box<dyn EntropySource>,
    bits: usize,
}

impl IdentifierGenerator {
    pub fn new(bits: usize) -> Self {
        Self::with_source(Box::new(OsEntropy), bits)
    }

    pub fn with_source(source: Box<dyn EntropySource>, bits: usize) -> Self {
        Self {
            source,
            bits: bits.clamp(MIN_IDENTIFIER_BITS, MAX_IDENTIFIER_BITS),
        }
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Fresh identifier with at least `length_bits` of entropy (never fewer
    /// than [`MIN_IDENTIFIER_BITS`]).
    pub fn new_identifier(&self, length_bits: usize) -> Result<String> {
        let bits = length_bits.clamp(MIN_IDENTIFIER_BITS, MAX_IDENTIFIER_BITS);
        let mut bytes = Zeroizing::new(vec![0u8; bits.div_ceil(8)]);
        self.source
            .try_fill(&mut bytes)
            .map_err(|e| LinkError::EntropyUnavailable(e.to_string()))?;
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(bytes.as_slice()))
    }

    /// Fresh push id and audience, drawn independently.
    pub fn new_room_link(&self) -> Result<RoomLink> {
        let push_id = Zeroizing::new(self.new_identifier(self.bits)?);
        let audience = Zeroizing::new(self.new_identifier(self.bits)?);
        RoomLink::new(&push_id, &audience)
    }
}

impl Default for IdentifierGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTIFIER_BITS)
    }
}
