// src/crypto.rs
use std::sync::Arc;

use anyhow::{bail, Result};
use pipsqueak_protocol::auth::SECRET_KEY_SIZE;
use pipsqueak_protocol::HmacEngine;

use crate::config::Config;

/// Holds the keyed HMAC engine shared by every request and response.
#[derive(Clone)]
pub struct Crypto {
    hmac: Arc<HmacEngine>,
}

impl Crypto {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let bytes = hex::decode(&cfg.key_hex)
            .map_err(|e| anyhow::anyhow!("invalid key_hex: {e}"))?;
        if bytes.len() != SECRET_KEY_SIZE { bail!("key_hex must be 64 hex chars"); }
        Ok(Self { hmac: Arc::new(HmacEngine::new(&bytes)?) })
    }

    #[inline] pub fn engine(&self) -> Arc<HmacEngine> {
        self.hmac.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{test_config, SECRET};

    #[test]
    fn engine_matches_configured_key() {
        let crypto = Crypto::from_config(&test_config()).unwrap();
        let reference = HmacEngine::new(SECRET).unwrap();
        assert_eq!(crypto.engine().generate(b"pipsqueak"), reference.generate(b"pipsqueak"));
    }

    #[test]
    fn short_or_malformed_keys_are_fatal() {
        let mut cfg = test_config();
        cfg.key_hex = "0011".into();
        assert!(Crypto::from_config(&cfg).is_err());
        cfg.key_hex = "zz".repeat(32);
        assert!(Crypto::from_config(&cfg).is_err());
    }
}
