// Command line interface
use anyhow::{bail, Result};
use clap::Parser;
use pipsqueak_protocol::auth::SECRET_KEY_SIZE;
use pipsqueak_protocol::DEFAULT_SERVER_PORT;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub device_id: u32,
    pub key: Vec<u8>,
    pub setpoint: f32,
    pub max_skew_secs: u32,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "pipsqueak_server", about = "Reference server for Pipsqueak devices")]
pub struct Cli {
    #[arg(long, default_value_t = format!("0.0.0.0:{DEFAULT_SERVER_PORT}"))]
    pub bind: String,
    /// The one registered device.
    #[arg(long, default_value_t = 127)]                pub device_id: u32,
    #[arg(long, default_value = "54686973497341546f7053656372657433324279746556616c75655061643332")]
    pub key_hex: String,
    #[arg(long, default_value_t = 20.0)]               pub setpoint: f32,
    #[arg(long, default_value_t = 5)]                  pub max_skew_secs: u32,
}

impl Cli {
    pub fn parse_and_build_config() -> Result<Config> {
        let c = <Cli as Parser>::parse();
        c.build()
    }

    pub fn build(self) -> Result<Config> {
        let key = hex::decode(&self.key_hex).map_err(|e| anyhow::anyhow!("invalid key_hex: {e}"))?;
        if key.len() != SECRET_KEY_SIZE {
            bail!("key_hex must be 64 hex chars");
        }
        if !self.setpoint.is_finite() {
            bail!("setpoint must be a finite temperature");
        }
        Ok(Config {
            bind: self.bind,
            device_id: self.device_id,
            key,
            setpoint: self.setpoint,
            max_skew_secs: self.max_skew_secs,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SECRET: &[u8; 32] = b"ThisIsATopSecret32ByteValuePad32";

    pub(crate) fn test_config() -> Config {
        Cli::try_parse_from(["pipsqueak_server"]).unwrap().build().unwrap()
    }

    #[test]
    fn defaults_use_the_shared_secret() {
        let cfg = test_config();
        assert_eq!(cfg.key, SECRET);
        assert_eq!(cfg.bind, "0.0.0.0:9001");
        assert_eq!(cfg.max_skew_secs, 5);
    }

    #[test]
    fn rejects_short_keys() {
        let cli = Cli::try_parse_from(["pipsqueak_server", "--key-hex", "abcd"]).unwrap();
        assert!(cli.build().is_err());
    }
}
