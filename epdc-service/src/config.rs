//! Configuration loading
//!
//! Decodes a postcard configuration blob, e.g. read from flash by the
//! board, and logs what was loaded.

use epdc_core::config::{ConfigError, EngineConfig, CONFIG_VERSION};

/// Decode and check a configuration blob
pub fn load_config(bytes: &[u8]) -> Result<EngineConfig, ConfigError> {
    debug!("decoding {} bytes of engine config", bytes.len());

    let config = EngineConfig::from_bytes(bytes).map_err(|e| {
        match e {
            ConfigError::VersionMismatch => warn!(
                "config version mismatch, expected {}",
                CONFIG_VERSION
            ),
            _ => warn!("engine config rejected: {:?}", e),
        }
        e
    })?;

    log_config_summary(&config);
    Ok(config)
}

/// Log a summary of the loaded configuration
fn log_config_summary(config: &EngineConfig) {
    info!("engine configuration loaded");
    debug!(
        "  panel {}x{}, {} bytes per pixel",
        config.panel.width,
        config.panel.height,
        config.bytes_per_pixel
    );
    debug!("  scheme {:?}, rotation {:?}", config.scheme, config.rotation);
    debug!("  power-down {:?}", config.power_down);
    debug!(
        "  lockout after {} failed power-ups",
        config.lockout_threshold
    );
}
