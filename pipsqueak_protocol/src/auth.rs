// HMAC-SHA256 signing and verification of request/response frames.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ProtocolError, Result};
use crate::HMAC_SIZE;

pub const SECRET_KEY_SIZE: usize = 32;

type HmacSha256 = Hmac<Sha256>;

pub type Tag = [u8; HMAC_SIZE];

/// Keyed once, reused for every message. Cloning the prepared state per call
/// skips re-deriving the inner/outer pads.
#[derive(Clone)]
pub struct HmacEngine {
    mac: HmacSha256,
}

impl HmacEngine {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != SECRET_KEY_SIZE {
            return Err(ProtocolError::KeyLength(key.len()));
        }
        let mac = HmacSha256::new_from_slice(key).map_err(|_| ProtocolError::KeyLength(key.len()))?;
        Ok(Self { mac })
    }

    pub fn generate(&self, message: &[u8]) -> Tag {
        let mut mac = self.mac.clone();
        mac.update(message);
        let mut tag = [0u8; HMAC_SIZE];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        tag
    }

    /// Compares all 32 bytes regardless of where the first mismatch is.
    pub fn validate(&self, message: &[u8], tag: &[u8]) -> bool {
        let mut mac = self.mac.clone();
        mac.update(message);
        mac.verify_slice(tag).is_ok()
    }
}

impl std::fmt::Debug for HmacEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HmacEngine(..)")
    }
}
