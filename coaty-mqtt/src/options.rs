//! Broker options of the MQTT binding.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use rumqttc::{LastWill, MqttOptions, TlsConfiguration, Transport};
use uuid::Uuid;

// Layer 3: Internal module imports
use coaty::binding::BindingError;

/// Default keep-alive interval in seconds.
pub const DEFAULT_KEEPALIVE_SECS: u64 = 60;

/// Default reconnect period in milliseconds.
pub const DEFAULT_RECONNECT_PERIOD_MS: u64 = 1000;

/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// TLS material for secured broker connections.
#[derive(Debug, Clone, Default)]
pub struct MqttTlsOptions {
    /// PEM-encoded certificate authority chain.
    pub ca: Vec<u8>,
    /// PEM-encoded client certificate, for mutual TLS.
    pub client_cert: Option<Vec<u8>>,
    /// PEM-encoded client private key, for mutual TLS.
    pub client_key: Option<Vec<u8>>,
}

/// Options of the MQTT binding.
///
/// The binding always connects with a clean session at QoS 0 and owns
/// its resubscription and republication logic; the client library's own
/// conveniences stay unused.
#[derive(Debug, Clone)]
pub struct MqttBindingOptions {
    /// Broker URL with scheme `mqtt`, `mqtts`, `tcp`, `tls`, `ws`, or
    /// `wss`, e.g. `mqtt://broker.local:1883`.
    pub broker_url: String,
    /// Keep-alive interval in seconds. Defaults to 60.
    pub keepalive_secs: Option<u64>,
    /// Delay between reconnection attempts in milliseconds. Defaults to
    /// 1000.
    pub reconnect_period_ms: Option<u64>,
    /// Connect timeout in milliseconds. Defaults to 30000.
    pub connect_timeout_ms: Option<u64>,
    /// Broker user name.
    pub username: Option<String>,
    /// Broker password.
    pub password: Option<String>,
    /// TLS material for `mqtts`/`tls`/`wss` schemes.
    pub tls: Option<MqttTlsOptions>,
}

impl MqttBindingOptions {
    /// Options for the given broker URL with defaults everywhere else.
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            keepalive_secs: None,
            reconnect_period_ms: None,
            connect_timeout_ms: None,
            username: None,
            password: None,
            tls: None,
        }
    }

    /// Builder method: broker credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Builder method: TLS material.
    pub fn with_tls(mut self, tls: MqttTlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// The effective reconnect period.
    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms.unwrap_or(DEFAULT_RECONNECT_PERIOD_MS))
    }

    /// The effective connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS))
    }

    /// Build the client options for one connection attempt.
    pub(crate) fn to_mqtt_options(
        &self,
        client_id: &str,
        last_will: LastWill,
    ) -> Result<MqttOptions, BindingError> {
        let (scheme, host, port) = parse_broker_url(&self.broker_url)?;
        let mut options = match scheme {
            Scheme::Tcp => MqttOptions::new(client_id, host, port),
            Scheme::Tls => {
                let mut options = MqttOptions::new(client_id, host, port);
                options.set_transport(Transport::Tls(self.tls_configuration()?));
                options
            }
            Scheme::Ws => {
                let mut options = MqttOptions::new(client_id, self.broker_url.clone(), port);
                options.set_transport(Transport::Ws);
                options
            }
            Scheme::Wss => {
                let mut options = MqttOptions::new(client_id, self.broker_url.clone(), port);
                options.set_transport(Transport::Wss(self.tls_configuration()?));
                options
            }
        };
        options
            .set_keep_alive(Duration::from_secs(
                self.keepalive_secs.unwrap_or(DEFAULT_KEEPALIVE_SECS),
            ))
            .set_clean_session(true)
            .set_last_will(last_will);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        Ok(options)
    }

    fn tls_configuration(&self) -> Result<TlsConfiguration, BindingError> {
        let tls = self.tls.as_ref().ok_or_else(|| {
            BindingError::InvalidOptions("TLS scheme requires TLS options".to_string())
        })?;
        let client_auth = match (&tls.client_cert, &tls.client_key) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            (None, None) => None,
            _ => {
                return Err(BindingError::InvalidOptions(
                    "client certificate and key must be given together".to_string(),
                ))
            }
        };
        Ok(TlsConfiguration::Simple {
            ca: tls.ca.clone(),
            alpn: None,
            client_auth,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

fn parse_broker_url(url: &str) -> Result<(Scheme, String, u16), BindingError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| BindingError::InvalidOptions(format!("broker URL {url:?} has no scheme")))?;
    let scheme = match scheme {
        "mqtt" | "tcp" => Scheme::Tcp,
        "mqtts" | "tls" => Scheme::Tls,
        "ws" => Scheme::Ws,
        "wss" => Scheme::Wss,
        other => {
            return Err(BindingError::InvalidOptions(format!(
                "unsupported broker URL scheme {other:?}"
            )))
        }
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().map_err(|_| {
                BindingError::InvalidOptions(format!("invalid broker port in {url:?}"))
            })?;
            (host.to_string(), port)
        }
        None => {
            let default_port = match scheme {
                Scheme::Tcp => 1883,
                Scheme::Tls => 8883,
                Scheme::Ws => 80,
                Scheme::Wss => 443,
            };
            (authority.to_string(), default_port)
        }
    };
    if host.is_empty() {
        return Err(BindingError::InvalidOptions(format!(
            "broker URL {url:?} has no host"
        )));
    }
    Ok((scheme, host, port))
}

/// Derive the deterministic MQTT 3.1 client identifier from the agent
/// identity id: `Coaty` followed by the first 18 hex characters of the
/// id with dashes removed, 23 bytes in total.
pub fn client_id(agent_id: &Uuid) -> String {
    let hex = agent_id.simple().to_string();
    format!("Coaty{}", &hex[..18])
}
