use serde::{Deserialize, Serialize};

use crate::connector::seed::NamespaceSeed;

/// Top-level configuration, loaded from a JSON file via `--config`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub connector: ConnectorConfig,

    /// When true, tool results are carried in the result's structured
    /// content instead of a text item. Wins over `use_text` when both are
    /// set.
    pub use_data: bool,

    /// Deprecated: kept for backwards-compatibility with configs that opted
    /// into `useText` when `data` was the default.
    pub use_text: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectorConfig {
    pub policy: Policy,

    /// Connectors made immediately available in their namespaces at startup.
    pub default_connectors: Vec<NamespaceSeed>,

    /// External base URL used to build interaction callbacks.
    /// Defaults to `http://localhost:<port>` derived from the HTTP listen
    /// address.
    #[serde(rename = "callbackBaseURL")]
    pub callback_base_url: String,

    /// Base directory for persisted secrets, laid out as
    /// `<base>/<driver>/<dbname>/<namespace>`. Absent means the default
    /// (`~/.secret/mcpt`); an explicit empty string keeps secrets in memory
    /// only.
    pub secret_base_location: Option<String>,

    pub backend_for_frontend: Option<BackendForFrontend>,
}

/// Authorization policy. When `oauth2` is absent, tenancy collapses to the
/// shared `default` namespace.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Policy {
    pub oauth2: Option<OAuth2Config>,

    /// When true, the authorization layer uses identity tokens.
    pub require_identity_token: bool,
}

/// OAuth2 client configuration used both for the authorization policy and
/// for the BigQuery connector flow.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    #[serde(rename = "authURL")]
    pub auth_url: String,
    #[serde(rename = "tokenURL")]
    pub token_url: String,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub scopes: Vec<String>,

    /// Shared HS256 secret enabling signature-verified claim extraction.
    /// Without it, claims are parsed unverified and used for namespace
    /// partitioning only.
    pub jwt_secret: Option<String>,
}

/// OAuth2 backend-for-frontend passthrough. The exchange itself is an
/// external collaborator; only the header name is consumed here.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackendForFrontend {
    pub authorization_exchange_header: String,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        Ok(config)
    }

    /// Expand runtime defaults that depend on how the server was started.
    pub fn init(&mut self, http_addr: Option<&str>) {
        if self.connector.secret_base_location.is_none() {
            self.connector.secret_base_location = Some("~/.secret/mcpt".to_string());
        }
        if self.connector.callback_base_url.is_empty() {
            let port = http_addr
                .and_then(|addr| addr.rsplit(':').next())
                .filter(|p| !p.is_empty())
                .unwrap_or("5000");
            self.connector.callback_base_url = format!("http://localhost:{port}");
        }
    }

    /// Which result field carries the JSON payload: `text` (default) or the
    /// structured content (`use_data`, which wins when both flags are set).
    pub fn use_text_field(&self) -> bool {
        !self.use_data
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(oauth2) = &self.connector.policy.oauth2 {
            if oauth2.auth_url.is_empty() {
                anyhow::bail!("Config error: connector.policy.oauth2.authURL is not set");
            }
        }
        for seed in &self.connector.default_connectors {
            for conn in &seed.connectors {
                if conn.name.is_empty() {
                    anyhow::bail!("Config error: default connector with empty name");
                }
                if conn.driver.is_empty() {
                    anyhow::bail!(
                        "Config error: default connector '{}' has no driver",
                        conn.name
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_text_field() {
        let config = Config::default();
        assert!(config.use_text_field());
    }

    #[test]
    fn explicit_use_data() {
        let config = Config {
            use_data: true,
            ..Default::default()
        };
        assert!(!config.use_text_field());
    }

    #[test]
    fn legacy_use_text() {
        let config = Config {
            use_text: true,
            ..Default::default()
        };
        assert!(config.use_text_field());
    }

    #[test]
    fn use_data_wins_over_use_text() {
        let config = Config {
            use_data: true,
            use_text: true,
            ..Default::default()
        };
        assert!(!config.use_text_field());
    }

    #[test]
    fn init_assigns_defaults_from_listen_address() {
        let mut config = Config::default();
        config.init(Some("0.0.0.0:8085"));
        assert_eq!(config.connector.callback_base_url, "http://localhost:8085");
        assert_eq!(
            config.connector.secret_base_location.as_deref(),
            Some("~/.secret/mcpt")
        );
    }

    #[test]
    fn init_preserves_explicit_values() {
        let mut config = Config::default();
        config.connector.callback_base_url = "https://tools.example.com".to_string();
        config.connector.secret_base_location = Some(String::new());
        config.init(Some("127.0.0.1:9000"));
        assert_eq!(config.connector.callback_base_url, "https://tools.example.com");
        // Empty string means in-memory only and must not be replaced.
        assert_eq!(config.connector.secret_base_location.as_deref(), Some(""));
    }

    #[test]
    fn parses_recognized_options() {
        let raw = r#"{
            "connector": {
                "policy": {"oauth2": {"clientId": "c", "authURL": "https://idp/auth", "tokenURL": "https://idp/token"}, "requireIdentityToken": true},
                "defaultConnectors": [
                    {"namespace": "default", "connectors": [{"name": "dev", "driver": "sqlite", "dsn": "sqlite://memdb1?mode=memory&cache=shared"}]}
                ],
                "callbackBaseURL": "http://localhost:5000",
                "secretBaseLocation": ""
            },
            "useData": true
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert!(config.use_data);
        assert!(config.connector.policy.require_identity_token);
        assert_eq!(config.connector.default_connectors.len(), 1);
        assert_eq!(
            config.connector.default_connectors[0].connectors[0].name,
            "dev"
        );
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_seed_without_driver() {
        let raw = r#"{"connector": {"defaultConnectors": [
            {"namespace": "default", "connectors": [{"name": "dev", "driver": "", "dsn": "x"}]}
        ]}}"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }
}
