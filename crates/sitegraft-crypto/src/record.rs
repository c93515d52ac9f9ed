//! The remote connection descriptor and its validation.

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

/// Default port for the remote MySQL source.
pub const DEFAULT_PORT: u16 = 3306;

/// Remote connection descriptor.
///
/// Persisted only in encrypted form; decrypted into memory for the
/// duration of a connection attempt and discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialRecord {
    /// `host`, `host:port`, `[ipv6]:port`, or a unix socket path.
    pub host: String,
    pub database: String,
    pub user: String,
    pub secret: String,
    pub charset: String,
    /// Physical table name prefix of the remote schema.
    pub table_prefix: String,
    /// Whether the remote installation is multi-tenant.
    pub multi_tenant: bool,
    /// Base URL the remote serves media from (old base for URL rewriting).
    pub media_base_url: String,
}

impl Default for CredentialRecord {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            database: String::new(),
            user: String::new(),
            secret: String::new(),
            charset: "utf8mb4".to_string(),
            table_prefix: "site_".to_string(),
            multi_tenant: false,
            media_base_url: String::new(),
        }
    }
}

impl CredentialRecord {
    /// Check the fields a connection attempt requires. Surfaced before any
    /// I/O is attempted.
    pub fn validate(&self) -> CryptoResult<()> {
        if self.host.trim().is_empty() {
            return Err(CryptoError::InvalidRecord("host is required".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(CryptoError::InvalidRecord(
                "database is required".to_string(),
            ));
        }
        if self.user.trim().is_empty() {
            return Err(CryptoError::InvalidRecord("user is required".to_string()));
        }
        Ok(())
    }

    /// Parse the host field into an address specification.
    pub fn host_spec(&self) -> HostSpec {
        HostSpec::parse(&self.host)
    }
}

/// Parsed remote address: TCP host/port or a unix socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSpec {
    Tcp { host: String, port: u16 },
    Socket(String),
}

impl HostSpec {
    /// Parse `host`, `host:port`, `[ipv6]:port`, or a socket path.
    ///
    /// Unresolvable fragments degrade to defaults rather than failing;
    /// connection errors surface at connect time.
    pub fn parse(raw: &str) -> HostSpec {
        let raw = raw.trim();

        if raw.starts_with('/') {
            return HostSpec::Socket(raw.to_string());
        }

        if let Some(rest) = raw.strip_prefix('[') {
            // Bracketed IPv6, e.g. [2001:db8::1]:3306
            if let Some(end) = rest.find(']') {
                let addr = &rest[..end];
                let host = if addr.is_empty() { "localhost" } else { addr };
                let port = rest[end + 1..]
                    .strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(DEFAULT_PORT);
                return HostSpec::Tcp {
                    host: host.to_string(),
                    port,
                };
            }
            // Unterminated bracket; treat the whole thing as a hostname.
            return HostSpec::Tcp {
                host: raw.to_string(),
                port: DEFAULT_PORT,
            };
        }

        if let Some((host, tail)) = raw.split_once(':') {
            let host = if host.is_empty() { "localhost" } else { host };
            if tail.starts_with('/') {
                return HostSpec::Socket(tail.to_string());
            }
            if let Ok(port) = tail.parse() {
                return HostSpec::Tcp {
                    host: host.to_string(),
                    port,
                };
            }
        }

        HostSpec::Tcp {
            host: if raw.is_empty() { "localhost" } else { raw }.to_string(),
            port: DEFAULT_PORT,
        }
    }
}
