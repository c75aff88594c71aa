use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wampsync_sdk::{Authenticator, SessionConfig, TicketAuthenticator, TransportConfig};

const DEFAULT_REALM: &str = "realm1";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Contents of `wsync.toml`. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WsyncConfig {
    pub connection: ConnectionFile,
    pub sports: SportsFile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionFile {
    pub url: Option<String>,
    pub realm: Option<String>,
    pub cid: Option<String>,
    pub ticket: Option<String>,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SportsFile {
    pub operator: Option<String>,
    pub lang: Option<String>,
}

impl WsyncConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Loads the file if it exists, otherwise returns an empty config.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

/// Connection values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOverrides {
    pub url: Option<String>,
    pub realm: Option<String>,
    pub cid: Option<String>,
    pub ticket: Option<String>,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub url: String,
    pub realm: String,
    pub cid: Option<String>,
    pub ticket: Option<String>,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
    pub timeout: Duration,
}

impl ConnectionSettings {
    /// Flags and environment win over the file.
    pub fn resolve(overrides: &ConnectionOverrides, file: &ConnectionFile) -> Result<Self> {
        fn pick(flag: &Option<String>, file: &Option<String>) -> Option<String> {
            flag.clone().or_else(|| file.clone())
        }

        let url = pick(&overrides.url, &file.url).context(
            "No router URL given. Pass --url, set WAMP_URL, or add [connection] url to wsync.toml",
        )?;
        let timeout_secs = overrides
            .timeout_secs
            .or(file.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(Self {
            url,
            realm: pick(&overrides.realm, &file.realm).unwrap_or_else(|| DEFAULT_REALM.to_string()),
            cid: pick(&overrides.cid, &file.cid),
            ticket: pick(&overrides.ticket, &file.ticket),
            origin: pick(&overrides.origin, &file.origin),
            user_agent: pick(&overrides.user_agent, &file.user_agent),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }

    /// Router URL with the client id appended as `cid`.
    pub fn endpoint(&self) -> Result<String> {
        let mut url =
            Url::parse(&self.url).with_context(|| format!("Invalid router URL: {}", self.url))?;
        if let Some(cid) = &self.cid {
            url.query_pairs_mut().append_pair("cid", cid);
        }
        Ok(url.to_string())
    }

    pub fn transport_config(&self) -> Result<TransportConfig> {
        let mut config = TransportConfig::new(self.endpoint()?);
        if let Some(origin) = &self.origin {
            config = config.with_origin(origin.clone());
        }
        if let Some(user_agent) = &self.user_agent {
            config = config.with_user_agent(user_agent.clone());
        }
        Ok(config)
    }

    pub fn session_config(&self) -> SessionConfig {
        let config = SessionConfig::new(self.realm.clone()).with_request_timeout(self.timeout);
        match self.ticket {
            Some(_) => config.with_authmethod("ticket"),
            None => config,
        }
    }

    pub fn authenticator(&self) -> Option<Arc<dyn Authenticator>> {
        self.ticket
            .clone()
            .map(|ticket| Arc::new(TicketAuthenticator::new(ticket)) as Arc<dyn Authenticator>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[connection]
url = "wss://router.example.com/v2"
realm = "sports"
timeout_secs = 5

[sports]
operator = "4093"
lang = "en"
"#
        )
        .unwrap();

        let config = WsyncConfig::load(file.path()).unwrap();
        assert_eq!(config.connection.realm.as_deref(), Some("sports"));
        assert_eq!(config.connection.timeout_secs, Some(5));
        assert_eq!(config.sports.operator.as_deref(), Some("4093"));
        assert!(config.connection.ticket.is_none());
    }

    #[test]
    fn test_missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = WsyncConfig::load_or_default(dir.path().join("wsync.toml")).unwrap();
        assert!(config.connection.url.is_none());
    }

    #[test]
    fn test_flags_override_file() {
        let file = ConnectionFile {
            url: Some("wss://file.example.com".into()),
            realm: Some("from-file".into()),
            ticket: Some("file-ticket".into()),
            ..Default::default()
        };
        let overrides = ConnectionOverrides {
            realm: Some("from-flag".into()),
            timeout_secs: Some(3),
            ..Default::default()
        };

        let settings = ConnectionSettings::resolve(&overrides, &file).unwrap();
        assert_eq!(settings.url, "wss://file.example.com");
        assert_eq!(settings.realm, "from-flag");
        assert_eq!(settings.ticket.as_deref(), Some("file-ticket"));
        assert_eq!(settings.timeout, Duration::from_secs(3));
        assert_eq!(settings.session_config().authmethods, vec!["ticket"]);
        assert!(settings.authenticator().is_some());
    }

    #[test]
    fn test_url_is_required() {
        let err = ConnectionSettings::resolve(&ConnectionOverrides::default(), &ConnectionFile::default())
            .unwrap_err();
        assert!(err.to_string().contains("WAMP_URL"));
    }

    #[test]
    fn test_cid_is_appended_to_endpoint() {
        let overrides = ConnectionOverrides {
            url: Some("wss://router.example.com/v2?lang=en".into()),
            cid: Some("abc 123".into()),
            ..Default::default()
        };
        let settings = ConnectionSettings::resolve(&overrides, &ConnectionFile::default()).unwrap();
        assert_eq!(
            settings.endpoint().unwrap(),
            "wss://router.example.com/v2?lang=en&cid=abc+123"
        );
        assert_eq!(settings.realm, "realm1");
        assert_eq!(settings.session_config().request_timeout, Duration::from_secs(30));
    }
}
