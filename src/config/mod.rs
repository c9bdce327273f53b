//! The `config` module handles loading and merging client configuration.
//!
//! Configuration can be provided programmatically via
//! [`Settings::for_brokers`], or loaded from a `config/client` file merged
//! with environment variables via [`load_config`]. Values absent from both
//! sources fall back to the defaults in [`Settings::default`].

mod settings;

#[cfg(test)]
mod tests;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    ClientSettings, ConnectionSettings, DispatchSettings, Settings, TlsSettings,
};

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing the client configuration
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/client").required(false))
        .add_source(Environment::default().separator("_"));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    Ok(Settings {
        client: ClientSettings {
            client_id: partial
                .client
                .as_ref()
                .and_then(|c| c.client_id.clone())
                .or(default.client.client_id),
            default_request_timeout_secs: partial
                .client
                .as_ref()
                .and_then(|c| c.default_request_timeout_secs)
                .unwrap_or(default.client.default_request_timeout_secs),
        },
        connection: ConnectionSettings {
            connect_retries: partial
                .connection
                .as_ref()
                .and_then(|c| c.connect_retries)
                .unwrap_or(default.connection.connect_retries),
            connect_timeout_secs: partial
                .connection
                .as_ref()
                .and_then(|c| c.connect_timeout_secs)
                .unwrap_or(default.connection.connect_timeout_secs),
            reconnect_delay_secs: partial
                .connection
                .as_ref()
                .and_then(|c| c.reconnect_delay_secs)
                .unwrap_or(default.connection.reconnect_delay_secs),
            reconnect_delay_max_secs: partial
                .connection
                .as_ref()
                .and_then(|c| c.reconnect_delay_max_secs)
                .unwrap_or(default.connection.reconnect_delay_max_secs),
            reconnect_back_off_multiplier: partial
                .connection
                .as_ref()
                .and_then(|c| c.reconnect_back_off_multiplier)
                .unwrap_or(default.connection.reconnect_back_off_multiplier),
            reconnect_delay_random: partial
                .connection
                .as_ref()
                .and_then(|c| c.reconnect_delay_random)
                .unwrap_or(default.connection.reconnect_delay_random),
            reconnect_when_disconnected: partial
                .connection
                .as_ref()
                .and_then(|c| c.reconnect_when_disconnected)
                .unwrap_or(default.connection.reconnect_when_disconnected),
        },
        dispatch: DispatchSettings {
            incoming_queue_size: partial
                .dispatch
                .as_ref()
                .and_then(|d| d.incoming_queue_size)
                .unwrap_or(default.dispatch.incoming_queue_size),
            incoming_pool_size: partial
                .dispatch
                .as_ref()
                .and_then(|d| d.incoming_pool_size)
                .unwrap_or(default.dispatch.incoming_pool_size),
        },
        tls: partial.tls,
        brokers: partial.brokers.unwrap_or(default.brokers),
    })
}
