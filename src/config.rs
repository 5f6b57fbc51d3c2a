/*!
 * Configuration types for the DS3 client
 */

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Ds3Error, Result};
use crate::protocol::{ChecksumType, Node, Priority, WriteOptimization};

/// Default number of temporary redirects followed per request
pub const DEFAULT_RETRIES: u32 = 5;

/// Default buffer size used when streaming request bodies (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Access id and secret key used to sign every request
#[derive(Deserialize)]
pub struct Credentials {
    pub client_id: String,

    #[serde(deserialize_with = "deserialize_secret")]
    secret_key: SecretString,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        let secret: String = secret_key.into();
        Self {
            client_id: client_id.into(),
            secret_key: SecretString::new(secret.into_boxed_str()),
        }
    }

    pub(crate) fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }

    /// Both parts must be present for a request to be signable
    pub fn is_valid(&self) -> bool {
        !self.client_id.is_empty() && !self.secret_key().is_empty()
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self::new(self.client_id.clone(), self.secret_key())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(SecretString::new(raw.into_boxed_str()))
}

/// Everything needed to reach and authenticate against one DS3 endpoint
///
/// Immutable once a client is built from it; use [`ConnectionDetails::with_node`]
/// to address a specific storage node returned by a job.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionDetails {
    /// Host, optionally with `:port` (a leading scheme is tolerated)
    pub endpoint: String,

    pub credentials: Credentials,

    #[serde(default)]
    pub https: bool,

    /// Proxy URL all requests are routed through
    #[serde(default)]
    pub proxy: Option<String>,

    /// Verify TLS certificates and host names. Turning this off is insecure.
    #[serde(default = "default_true")]
    pub certificate_verification: bool,

    /// Temporary redirects followed before giving up
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Read size used when streaming request bodies
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl ConnectionDetails {
    pub fn new(endpoint: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials,
            https: false,
            proxy: None,
            certificate_verification: true,
            retries: DEFAULT_RETRIES,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Load connection details from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let details: ConnectionDetails = toml::from_str(&contents)
            .map_err(|e| Ds3Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        details.validate()?;
        Ok(details)
    }

    /// Load connection details from `DS3_*` environment variables
    ///
    /// `DS3_ENDPOINT`, `DS3_ACCESS_KEY` and `DS3_SECRET_KEY` are required;
    /// `DS3_PROXY`, `DS3_HTTPS` and `DS3_VERIFY_CERT` are optional.
    pub fn from_env() -> Result<Self> {
        let required = |name: &str| {
            std::env::var(name)
                .map_err(|_| Ds3Error::InvalidConfig(format!("{} is not set", name)))
        };
        let flag = |name: &str, default: bool| match std::env::var(name) {
            Ok(value) => matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"),
            Err(_) => default,
        };

        let mut details = ConnectionDetails::new(
            required("DS3_ENDPOINT")?,
            Credentials::new(required("DS3_ACCESS_KEY")?, required("DS3_SECRET_KEY")?),
        );
        details.proxy = std::env::var("DS3_PROXY").ok().filter(|p| !p.is_empty());
        details.https = flag("DS3_HTTPS", false);
        details.certificate_verification = flag("DS3_VERIFY_CERT", true);
        details.validate()?;
        Ok(details)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host_field().is_empty() {
            return Err(Ds3Error::InvalidConfig(
                "Endpoint cannot be empty".to_string(),
            ));
        }
        if !self.credentials.is_valid() {
            return Err(Ds3Error::InvalidConfig(
                "Both client id and secret key must be provided".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(Ds3Error::InvalidConfig(
                "Buffer size must be at least 1 byte".to_string(),
            ));
        }
        Ok(())
    }

    /// `host[:port]` as sent in the Host header
    pub fn host_field(&self) -> &str {
        let endpoint = self.endpoint.trim_end_matches('/');
        match endpoint.split_once("://") {
            Some((_, rest)) => rest,
            None => endpoint,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.endpoint.starts_with("https://") || self.https {
            "https"
        } else {
            "http"
        }
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.host_field())
    }

    /// Clone these details re-targeted at one of a job's storage nodes
    pub fn with_node(&self, node: &Node) -> Self {
        let port = if self.scheme() == "https" {
            node.https_port
        } else {
            node.http_port
        };
        let endpoint = match port {
            Some(port) => format!("{}:{}", node.endpoint, port),
            None => node.endpoint.clone(),
        };
        Self {
            endpoint,
            https: self.scheme() == "https",
            ..self.clone()
        }
    }
}

/// Builder for ConnectionDetails
pub struct ConnectionDetailsBuilder {
    details: ConnectionDetails,
}

impl ConnectionDetailsBuilder {
    pub fn new(endpoint: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            details: ConnectionDetails::new(endpoint, credentials),
        }
    }

    pub fn https(mut self, https: bool) -> Self {
        self.details.https = https;
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.details.proxy = Some(proxy.into());
        self
    }

    /// Disable certificate and host name verification
    pub fn insecure(mut self) -> Self {
        self.details.certificate_verification = false;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.details.retries = retries;
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.details.buffer_size = buffer_size;
        self
    }

    pub fn build(self) -> Result<ConnectionDetails> {
        self.details.validate()?;
        Ok(self.details)
    }
}

/// Options used when a write job is created
#[derive(Debug, Clone, Default)]
pub struct WriteJobOptions {
    pub priority: Option<Priority>,
    pub write_optimization: Option<WriteOptimization>,
    /// Upper bound for the size of the blobs the server splits objects into
    pub max_upload_size: Option<u64>,
    pub checksum_type: ChecksumType,
}

impl WriteJobOptions {
    pub fn with_checksum(mut self, checksum_type: ChecksumType) -> Self {
        self.checksum_type = checksum_type;
        self
    }
}

/// Options used when a read job is created
#[derive(Debug, Clone, Default)]
pub struct ReadJobOptions {
    pub priority: Option<Priority>,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Logging setup for applications embedding the client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write JSON lines to this file instead of compact stdout output
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Shorthand for `log_level = "debug"`
    #[serde(default)]
    pub verbose: bool,
}
