// Device failures that are not wire-level error records
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("IO: {0}")] Io(#[from] std::io::Error),
    #[error("Config: {0}")] Config(String),
    #[error("Transport: {0}")] Transport(String),
}
