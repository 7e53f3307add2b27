//! Binary configuration blobs
//!
//! Configuration travels as postcard-encoded bytes, e.g. from flash.

use super::types::{ConfigError, EngineConfig, CONFIG_VERSION};

impl EngineConfig {
    /// Encode into `buf`, returning the used prefix
    pub fn to_bytes<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], ConfigError> {
        postcard::to_slice(self, buf).map_err(|_| ConfigError::Serialize)
    }

    /// Decode and check a configuration blob
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            postcard::from_bytes(bytes).map_err(|_| ConfigError::Deserialize)?;
        if config.version != CONFIG_VERSION {
            return Err(ConfigError::VersionMismatch);
        }
        config.validate()?;
        Ok(config)
    }
}
