use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid setting {key}: {message}")]
    InvalidSetting { key: String, message: String },

    #[error("Settings store error: {0}")]
    Settings(#[from] bridge_traits::BridgeError),
}

pub type Result<T> = std::result::Result<T, Error>;
