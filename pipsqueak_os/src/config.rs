// Command line interface
// device identity, secret, server endpoint, thermal limits
use anyhow::{bail, Result};
use clap::Parser;
use pipsqueak_protocol::DEFAULT_SERVER_PORT;

use crate::errors::DeviceError;

pub const SENSOR_ADDRESS_SIZE: usize = 8;
pub const DS18B20_FAMILY_CODE: u8 = 0x28;

pub type SensorAddress = [u8; SENSOR_ADDRESS_SIZE];

#[derive(Clone)]
pub struct Config {
    pub device_id: u32,
    pub key_hex: String,
    pub server_host: String,
    pub server_port: u16,
    pub wifi_ssid: String,
    pub wifi_password: String,
    temperature_setpoint: f32,
    pub board_sensor_address: SensorAddress,
    pub board_temperature_limit: f32,
    pub poll_ms: u64,
    pub ambient: f32,
}

impl Config {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn temperature_setpoint(&self) -> f32 {
        self.temperature_setpoint
    }

    pub fn set_temperature_setpoint(&mut self, setpoint: f32) {
        self.temperature_setpoint = setpoint;
    }

    pub fn is_board_sensor_address(&self, address: &SensorAddress) -> bool {
        *address == self.board_sensor_address
    }
}

// secrets stay out of the startup log
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("device_id", &self.device_id)
            .field("server", &self.server_addr())
            .field("wifi_ssid", &self.wifi_ssid)
            .field("temperature_setpoint", &self.temperature_setpoint)
            .field("board_sensor_address", &hex::encode(self.board_sensor_address))
            .field("board_temperature_limit", &self.board_temperature_limit)
            .field("poll_ms", &self.poll_ms)
            .finish_non_exhaustive()
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "pipsqueak_os", about = "Pipsqueak temperature controller")]
pub struct Cli {
    #[arg(long, default_value_t = 127)]                   pub device_id: u32,
    #[arg(long, default_value = "54686973497341546f7053656372657433324279746556616c75655061643332")]
    pub key_hex: String,
    #[arg(long, default_value = "127.0.0.1")]             pub server_host: String,
    #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]   pub server_port: u16,
    #[arg(long, default_value = "pipsqueak")]             pub wifi_ssid: String,
    #[arg(long, default_value = "")]                      pub wifi_password: String,
    #[arg(long, default_value_t = 20.0)]                  pub setpoint: f32,
    #[arg(long, default_value = "28ff641e8216c3a1")]      pub board_sensor: String,
    #[arg(long, default_value_t = 50.0)]                  pub board_temperature_limit: f32,
    #[arg(long, default_value_t = 10)]                    pub poll_ms: u64,
    /// Ambient temperature of the simulated plant, in °C.
    #[arg(long, default_value_t = 24.0)]                  pub ambient: f32,
}

impl Cli {
    pub fn parse_and_build_config() -> Result<Config> {
        let c = <Cli as Parser>::parse();
        c.build()
    }

    /// Persisted-state integrity checks live here; any failure is fatal.
    pub fn build(self) -> Result<Config> {
        if !self.setpoint.is_finite() {
            bail!("setpoint must be a finite temperature");
        }
        if !self.board_temperature_limit.is_finite() {
            bail!("board_temperature_limit must be a finite temperature");
        }
        if self.poll_ms == 0 {
            bail!("poll_ms must be positive");
        }
        Ok(Config {
            device_id: self.device_id,
            key_hex: self.key_hex,
            server_host: self.server_host,
            server_port: self.server_port,
            wifi_ssid: self.wifi_ssid,
            wifi_password: self.wifi_password,
            temperature_setpoint: self.setpoint,
            board_sensor_address: parse_sensor_address(&self.board_sensor)?,
            board_temperature_limit: self.board_temperature_limit,
            poll_ms: self.poll_ms,
            ambient: self.ambient,
        })
    }
}

pub fn parse_sensor_address(text: &str) -> Result<SensorAddress, DeviceError> {
    let bytes = hex::decode(text).map_err(|e| DeviceError::Config(format!("invalid sensor address: {e}")))?;
    let address: SensorAddress = bytes
        .try_into()
        .map_err(|_| DeviceError::Config("sensor address must be 16 hex chars".into()))?;
    if address[0] != DS18B20_FAMILY_CODE {
        return Err(DeviceError::Config(format!("not a DS18B20 address: {text}")));
    }
    Ok(address)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SECRET: &[u8; 32] = b"ThisIsATopSecret32ByteValuePad32";

    pub(crate) fn cli() -> Cli {
        Cli::parse_from(["pipsqueak_os"])
    }

    pub(crate) fn test_config() -> Config {
        cli().build().unwrap()
    }

    #[test]
    fn defaults_build() {
        let cfg = test_config();
        assert_eq!(cfg.device_id, 127);
        assert_eq!(cfg.server_addr(), "127.0.0.1:9001");
        assert_eq!(hex::decode(&cfg.key_hex).unwrap(), SECRET.to_vec());
        assert!(cfg.is_board_sensor_address(&[0x28, 0xFF, 0x64, 0x1E, 0x82, 0x16, 0xC3, 0xA1]));
        assert!(!cfg.is_board_sensor_address(&[0x28; 8]));
    }

    #[test]
    fn debug_hides_secrets() {
        let mut cfg = test_config();
        cfg.wifi_password = "hunter2".into();
        let shown = format!("{cfg:?}");
        assert!(!shown.contains(&cfg.key_hex));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn rejects_corrupt_values() {
        let mut c = cli();
        c.board_sensor = "28ff".into();
        assert!(c.build().is_err());

        let mut c = cli();
        c.board_sensor = "10ff641e8216c3a1".into();
        assert!(c.build().is_err());

        let mut c = cli();
        c.setpoint = f32::NAN;
        assert!(c.build().is_err());
    }

    #[test]
    fn setpoint_is_mutable() {
        let mut cfg = test_config();
        cfg.set_temperature_setpoint(18.5);
        assert_eq!(cfg.temperature_setpoint(), 18.5);
    }
}
