use std::path::PathBuf;

use serde::Deserialize;

use crate::broker::Broker;

/// Top-level configuration settings for the fabric client.
///
/// Includes the broker directory plus client identity, connection, dispatch
/// and TLS settings.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub client: ClientSettings,
    pub connection: ConnectionSettings,
    pub dispatch: DispatchSettings,
    /// TLS credentials; when absent the client dials brokers in the clear
    /// (`ws://`), which is only appropriate for local testing.
    pub tls: Option<TlsSettings>,
    pub brokers: Vec<Broker>,
}

/// Identity and request defaults for the client.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    /// Explicit client id; a random one is generated when omitted.
    pub client_id: Option<String>,
    /// Default timeout applied to synchronous requests, in seconds.
    pub default_request_timeout_secs: u64,
}

/// Connection establishment and retry behavior.
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionSettings {
    /// Number of full passes over the broker directory before `connect` gives
    /// up. Negative means retry forever.
    pub connect_retries: i32,
    /// Per-broker attempt timeout, in seconds.
    pub connect_timeout_secs: u64,
    /// Delay before the first retry pass, in seconds.
    pub reconnect_delay_secs: u64,
    /// Upper bound on the retry delay, in seconds.
    pub reconnect_delay_max_secs: u64,
    /// Multiplier applied to the delay after each failed pass.
    pub reconnect_back_off_multiplier: f64,
    /// Fraction of random jitter added to each delay (0.25 = up to 25%).
    pub reconnect_delay_random: f64,
    /// Whether to reconnect automatically after an unrequested link loss.
    pub reconnect_when_disconnected: bool,
}

/// Inbound message dispatch behavior.
#[derive(Debug, Deserialize, Clone)]
pub struct DispatchSettings {
    /// Capacity of the bounded inbound queue; the reader applies backpressure
    /// when it fills.
    pub incoming_queue_size: usize,
    /// Number of dispatch workers. The default of 1 preserves per-connection
    /// callback ordering; larger pools trade ordering for throughput.
    pub incoming_pool_size: usize,
}

/// Paths to the PEM material used to authenticate the connection.
#[derive(Debug, Deserialize, Clone)]
pub struct TlsSettings {
    /// CA bundle the broker's certificate chain must validate against.
    pub ca_bundle: PathBuf,
    /// Client certificate presented to the broker.
    pub cert_file: PathBuf,
    /// Private key matching `cert_file`.
    pub private_key: PathBuf,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub client: Option<PartialClientSettings>,
    pub connection: Option<PartialConnectionSettings>,
    pub dispatch: Option<PartialDispatchSettings>,
    pub tls: Option<TlsSettings>,
    pub brokers: Option<Vec<Broker>>,
}

/// Partial client settings.
#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub client_id: Option<String>,
    pub default_request_timeout_secs: Option<u64>,
}

/// Partial connection settings.
#[derive(Debug, Deserialize)]
pub struct PartialConnectionSettings {
    pub connect_retries: Option<i32>,
    pub connect_timeout_secs: Option<u64>,
    pub reconnect_delay_secs: Option<u64>,
    pub reconnect_delay_max_secs: Option<u64>,
    pub reconnect_back_off_multiplier: Option<f64>,
    pub reconnect_delay_random: Option<f64>,
    pub reconnect_when_disconnected: Option<bool>,
}

/// Partial dispatch settings.
#[derive(Debug, Deserialize)]
pub struct PartialDispatchSettings {
    pub incoming_queue_size: Option<usize>,
    pub incoming_pool_size: Option<usize>,
}

/// Provides default values for `Settings`.
///
/// Ensures the client has sensible defaults if no configuration is provided.
/// The broker directory defaults to empty and must be supplied before
/// connecting.
impl Default for Settings {
    fn default() -> Self {
        Self {
            client: ClientSettings {
                client_id: None,
                default_request_timeout_secs: 3600,
            },
            connection: ConnectionSettings {
                connect_retries: -1,
                connect_timeout_secs: 10,
                reconnect_delay_secs: 1,
                reconnect_delay_max_secs: 60,
                reconnect_back_off_multiplier: 2.0,
                reconnect_delay_random: 0.25,
                reconnect_when_disconnected: true,
            },
            dispatch: DispatchSettings {
                incoming_queue_size: 1000,
                incoming_pool_size: 1,
            },
            tls: None,
            brokers: Vec::new(),
        }
    }
}

impl Settings {
    /// Default settings pointed at the given broker directory. The usual
    /// entry point when configuring the client programmatically.
    pub fn for_brokers(brokers: Vec<Broker>) -> Self {
        Self {
            brokers,
            ..Self::default()
        }
    }
}
