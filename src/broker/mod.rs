//! The `broker` module defines the broker descriptor and the ordering policy
//! the client applies over its broker directory when connecting.
//!
//! A [`Broker`] is a pure value: host name, optional IP address, port and an
//! optional unique id used in log output. The connection supervisor walks the
//! directory in [`connection_order`], which keeps the last successfully
//! connected broker first so a healthy fabric yields a stable choice.

#[cfg(test)]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::error::{ClientError, Result};

/// Default broker port when a definition omits one.
pub const DEFAULT_PORT: u16 = 8883;

const SSL_PROTOCOL: &str = "ssl";
const FIELD_SEPARATOR: char = ';';

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// A single broker in the fabric's directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broker {
    /// Identifier used to recognize the broker in logs and directory updates.
    #[serde(default)]
    pub unique_id: String,
    /// Host name (or address) the client dials first.
    #[serde(alias = "host")]
    pub host_name: String,
    /// Fallback address dialed when the host name cannot be reached.
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Broker {
    pub fn new(host_name: &str, port: u16) -> Result<Self> {
        let host = strip_brackets(host_name);
        if host.is_empty() {
            return Err(ClientError::MalformedBroker("empty host name".to_string()));
        }
        if port == 0 {
            return Err(ClientError::MalformedBroker("invalid port".to_string()));
        }
        Ok(Self {
            unique_id: String::new(),
            host_name: host,
            ip_address: None,
            port,
        })
    }

    pub fn with_unique_id(mut self, unique_id: &str) -> Self {
        self.unique_id = unique_id.to_string();
        self
    }

    pub fn with_ip_address(mut self, ip_address: &str) -> Self {
        self.ip_address = Some(strip_brackets(ip_address));
        self
    }

    /// Parses a broker URL of the form `[ssl://]<hostname>[:port]`.
    ///
    /// If the port is omitted it defaults to 8883. Any protocol other than
    /// `ssl` is rejected.
    pub fn parse(broker_url: &str) -> Result<Self> {
        let (protocol, rest) = match broker_url.split_once("://") {
            Some((protocol, rest)) => (protocol, rest),
            None => (SSL_PROTOCOL, broker_url),
        };
        if !protocol.eq_ignore_ascii_case(SSL_PROTOCOL) {
            return Err(ClientError::MalformedBroker(format!(
                "unknown protocol: {protocol}"
            )));
        }
        let (host, port) = match rest.rsplit_once(':') {
            // A port suffix is only recognized after a bracketed host or a
            // host with no other colons; a bare IPv6 address is all host.
            Some((host, port))
                if !host.is_empty()
                    && !port.contains(']')
                    && (host.ends_with(']') || !host.contains(':')) =>
            {
                (host, parse_port(port)?)
            }
            _ => (rest, DEFAULT_PORT),
        };
        Self::new(host, port)
    }

    /// Parses a semicolon-separated directory entry:
    /// `[unique_id];<port>;<host>[;ip]` or the short form `<port>;<host>[;ip]`.
    pub fn parse_directory_entry(entry: &str) -> Result<Self> {
        let fields: Vec<&str> = entry.split(FIELD_SEPARATOR).map(str::trim).collect();
        if fields.len() < 2 {
            return Err(ClientError::MalformedBroker(
                "missing broker fields".to_string(),
            ));
        }
        // The leading field is a unique id unless it parses as a port.
        let (unique_id, port_field, rest) = if fields[0].parse::<u16>().is_ok() {
            ("", fields[0], &fields[1..])
        } else if fields.len() >= 3 {
            (fields[0], fields[1], &fields[2..])
        } else {
            return Err(ClientError::MalformedBroker(
                "missing broker fields".to_string(),
            ));
        };
        let mut broker = Self::new(rest[0], parse_port(port_field)?)?.with_unique_id(unique_id);
        if let Some(ip) = rest.get(1).filter(|ip| !ip.is_empty()) {
            broker = broker.with_ip_address(ip);
        }
        Ok(broker)
    }

    /// True when `other` denotes the same broker endpoint.
    pub fn same_endpoint(&self, other: &Broker) -> bool {
        self.host_name == other.host_name && self.port == other.port
    }
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.unique_id.is_empty() {
            write!(f, "{{{}}} ", self.unique_id)?;
        }
        write!(f, "{}:{}", self.host_name, self.port)?;
        if let Some(ip) = &self.ip_address {
            write!(f, " ({ip})")?;
        }
        Ok(())
    }
}

fn parse_port(s: &str) -> Result<u16> {
    match s.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ClientError::MalformedBroker(format!("invalid port: {s}"))),
    }
}

fn strip_brackets(host: &str) -> String {
    // IPv6 addresses may arrive bracketed
    host.trim().replace(['[', ']'], "")
}

/// Orders the directory for a connection pass.
///
/// The broker that served the previous session (if any) is moved to the front;
/// the remainder keeps its configured order. Repeated reconnects against a
/// healthy fabric therefore land on the same broker.
pub(crate) fn connection_order(brokers: &[Broker], last_connected: Option<&Broker>) -> Vec<Broker> {
    let mut ordered: Vec<Broker> = Vec::with_capacity(brokers.len());
    if let Some(last) = last_connected {
        if let Some(known) = brokers.iter().find(|b| b.same_endpoint(last)) {
            ordered.push(known.clone());
        }
    }
    for broker in brokers {
        if !ordered.iter().any(|b| b.same_endpoint(broker)) {
            ordered.push(broker.clone());
        }
    }
    ordered
}
