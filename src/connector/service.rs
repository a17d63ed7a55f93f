//! Namespace-aware connector service: lookup with opportunistic
//! elicitation, the two-step add flow, listing and removal.

use std::sync::Arc;
use std::time::Duration;

use rmcp::elicit_safe;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::auth::{is_default_namespace, Scope};
use crate::connector::input::ConnectionInput;
use crate::connector::manager::Manager;
use crate::connector::meta::{match_meta, CredentialShape};
use crate::connector::{Connector, ConnectorInfo};
use crate::error::{Error, Result};

/// Upper bound on waiting for a secret submission.
const PENDING_WAIT: Duration = Duration::from_secs(5 * 60);

/// Acknowledgement schema for the secrets-flow elicit; the callback URL is
/// carried in the elicit message for the client to open in a browser.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct FlowAck {
    /// URI of the flow to initiate
    #[schemars(description = "URI of the flow to initiate")]
    pub flow_uri: String,
}

elicit_safe!(FlowAck);

/// Result of attempting to register a connector via `dbSetConnection`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutput {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(rename = "callbackURL", skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
}

impl AddOutput {
    fn ok(connector: String) -> Self {
        Self {
            status: "ok".to_string(),
            connector: Some(connector),
            ..Default::default()
        }
    }

    fn pending(connector: String, callback_url: String) -> Self {
        Self {
            status: "ok".to_string(),
            state: Some("pendingSecret".to_string()),
            callback_url: Some(callback_url),
            connector: Some(connector),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListInput {
    #[serde(default)]
    pub pattern: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<ConnectorInfo>>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ConnectorService {
    manager: Arc<Manager>,
}

impl ConnectorService {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn namespace(&self, scope: &Scope) -> Result<String> {
        self.manager.auth().namespace(scope)
    }

    fn supports_elicitation(&self, scope: &Scope) -> bool {
        scope
            .peer
            .as_ref()
            .is_some_and(|peer| peer.supports_elicitation())
    }

    /// Retrieve a connector by name. A miss (either not-found kind) is
    /// recoverable: when the client supports elicitation, ask for connector
    /// details once and retry the lookup.
    pub async fn connection(&self, scope: &Scope, name: &str) -> Result<Arc<Connector>> {
        match self.manager.connection(scope, name).await {
            Ok(connector) => Ok(connector),
            Err(err) if err.is_not_found() && self.supports_elicitation(scope) => {
                let new_name = self.request_connector_elicit(scope, name).await?;
                self.manager.connection(scope, &new_name).await
            }
            Err(err) => Err(err),
        }
    }

    /// Register or update a connector with the two-step elicitation flow:
    /// a form elicit for missing non-secret parameters, then the
    /// out-of-band browser flow for secrets.
    pub async fn add_connection(&self, scope: &Scope, input: &ConnectionInput) -> Result<AddOutput> {
        let meta = match_meta(&input.driver);
        if input.needs_form(meta) {
            if !self.supports_elicitation(scope) {
                return Err(Error::Validation(
                    "client does not support MCP elicitation; provide all required fields: \
                     name, driver and driver-specific parameters"
                        .to_string(),
                ));
            }
            return self.request_connector_form(scope, input).await;
        }

        let mut input = input.clone();
        input.init(meta);
        input.validate(meta)?;
        let dsn = input.expand(meta.dsn_template);
        let connector = Arc::new(Connector::new(
            &input.name,
            &input.driver,
            dsn,
            Arc::clone(self.manager.secrets()),
        ));
        self.add(scope, connector).await
    }

    /// Register a connector. If its DSN needs no secret the connector
    /// becomes active immediately; otherwise it is placed in pending state
    /// and, when the client supports elicitation, a browser flow is
    /// initiated to collect the secret. Never returns the secret itself.
    pub async fn add(&self, scope: &Scope, connector: Arc<Connector>) -> Result<AddOutput> {
        let pending = self
            .manager
            .generate_pending(scope, Arc::clone(&connector))
            .await?;
        if let Some(peer) = &scope.peer {
            pending.set_peer(peer.clone());
        }

        if pending.cred_shape == CredentialShape::Basic && !connector.needs_secret() {
            self.manager.complete_pending(&pending.uuid).await?;
            return Ok(AddOutput::ok(connector.name()));
        }

        let Some(peer) = scope
            .peer
            .clone()
            .filter(|peer| peer.supports_elicitation())
        else {
            // Without elicitation the caller drives the browser flow itself.
            return Ok(AddOutput::pending(
                connector.name(),
                pending.callback_url.clone(),
            ));
        };

        let message = format!(
            "Initiate secrets flow for {} connector: open {}",
            connector.name(),
            pending.callback_url
        );
        tokio::spawn(async move {
            let _ = peer.elicit::<FlowAck>(message).await;
        });

        // Wait for secret submission; a timeout leaves the connector
        // un-activated and is not an error.
        tokio::select! {
            _ = pending.wait() => {
                if self.manager.connection(scope, &connector.name()).await.is_ok() {
                    Ok(AddOutput::ok(connector.name()))
                } else {
                    Ok(AddOutput::pending(connector.name(), pending.callback_url.clone()))
                }
            }
            _ = tokio::time::sleep(PENDING_WAIT) => {
                Ok(AddOutput::pending(connector.name(), pending.callback_url.clone()))
            }
        }
    }

    /// Elicit the connector form, then drive the add flow with the
    /// accepted values.
    async fn request_connector_form(
        &self,
        scope: &Scope,
        initial: &ConnectionInput,
    ) -> Result<AddOutput> {
        let peer = scope
            .peer
            .as_ref()
            .ok_or_else(|| Error::Interaction("no client peer available".to_string()))?;

        let namespace = self.namespace(scope)?;
        let mut message = "Please provide connection details".to_string();
        if !initial.name.is_empty() {
            message.push_str(&format!(" for {}", initial.name));
        }
        if !is_default_namespace(&namespace) {
            message.push_str(&format!(" in namespace {namespace}"));
        }

        let mut input = match peer.elicit::<ConnectionInput>(message).await {
            Ok(Some(input)) => input,
            Ok(None) => {
                return Err(Error::Interaction(
                    "user: reject adding connection".to_string(),
                ))
            }
            Err(err) => return Err(Error::Interaction(format!("elicitation failed: {err}"))),
        };
        if input.name.is_empty() {
            input.name = initial.name.clone();
        }

        let meta = match_meta(&input.driver);
        input.init(meta);
        input.validate(meta)?;
        let connector = Arc::new(Connector::new(
            &input.name,
            &input.driver,
            input.expand(meta.dsn_template),
            Arc::clone(self.manager.secrets()),
        ));
        self.add(scope, connector).await
    }

    /// Ask the client for connector details when a lookup missed; returns
    /// the (possibly different) connector name to retry with.
    async fn request_connector_elicit(&self, scope: &Scope, name: &str) -> Result<String> {
        let initial = ConnectionInput {
            name: name.to_string(),
            ..Default::default()
        };
        let output = self.request_connector_form(scope, &initial).await?;
        Ok(output.connector.unwrap_or_else(|| name.to_string()))
    }

    /// All connectors visible in the caller's namespace.
    pub async fn list(&self, scope: &Scope) -> Vec<Arc<Connector>> {
        match self.manager.namespace_of(scope).await {
            Ok(ns) => ns.values().await,
            Err(_) => Vec::new(),
        }
    }

    /// List connectors, seeding a `dev` connector through the elicit path
    /// when the tenant is empty.
    pub async fn list_connectors(&self, scope: &Scope, input: &ListInput) -> ListOutput {
        let mut connectors = self.list(scope).await;
        if connectors.is_empty() && self.supports_elicitation(scope) {
            let seed = ConnectionInput {
                name: "dev".to_string(),
                ..Default::default()
            };
            if let Err(err) = self.add_connection(scope, &seed).await {
                tracing::debug!(error = %err, "dev connector seeding declined");
            }
            connectors = self.list(scope).await;
        }

        let data: Vec<ConnectorInfo> = connectors
            .iter()
            .filter(|c| input.pattern.is_empty() || c.name().contains(&input.pattern))
            .map(|c| c.describe())
            .collect();
        ListOutput {
            data: if data.is_empty() { None } else { Some(data) },
            status: "ok".to_string(),
            error: None,
        }
    }

    /// Tenant-scoped delete; silent on miss.
    pub async fn remove(&self, scope: &Scope, name: &str) {
        if let Ok(ns) = self.manager.namespace_of(scope).await {
            ns.delete(name).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthService;
    use crate::config::{ConnectorConfig, OAuth2Config, Policy};
    use crate::secret::SecretStore;

    async fn service(policy: Policy) -> ConnectorService {
        sqlx::any::install_default_drivers();
        let auth = Arc::new(AuthService::new(policy));
        let manager = Manager::new(
            Arc::new(ConnectorConfig::default()),
            auth,
            Arc::new(SecretStore::new()),
        )
        .await;
        ConnectorService::new(Arc::new(manager))
    }

    fn sqlite_input(name: &str, db: &str) -> ConnectionInput {
        ConnectionInput {
            name: name.to_string(),
            driver: "sqlite".to_string(),
            db: format!("{db}?mode=memory&cache=shared"),
            ..Default::default()
        }
    }

    fn oauth_policy() -> Policy {
        Policy {
            oauth2: Some(OAuth2Config {
                client_id: "client".to_string(),
                ..Default::default()
            }),
            require_identity_token: false,
        }
    }

    fn token_for(email: &str) -> String {
        crate::auth::tests::unsigned_jwt(serde_json::json!({ "email": email }))
    }

    #[tokio::test]
    async fn secretless_connector_activates_immediately() {
        let svc = service(Policy::default()).await;
        let scope = Scope::default();
        let out = svc
            .add_connection(&scope, &sqlite_input("dev", "svc_activate"))
            .await
            .unwrap();
        assert_eq!(out.status, "ok");
        assert_eq!(out.state, None);
        let conn = svc.connection(&scope, "dev").await.unwrap();
        assert_eq!(conn.driver(), "sqlite");
    }

    #[tokio::test]
    async fn secret_connector_reports_callback_without_elicitation() {
        let svc = service(Policy::default()).await;
        let scope = Scope::default();
        let input = ConnectionInput {
            name: "orders".to_string(),
            driver: "mysql".to_string(),
            db: "orders".to_string(),
            ..Default::default()
        };
        let out = svc.add_connection(&scope, &input).await.unwrap();
        assert_eq!(out.state.as_deref(), Some("pendingSecret"));
        let url = out.callback_url.expect("callback URL for browser flow");
        assert!(url.contains("/ui/interaction/"));
        // Not activated until the secret arrives.
        assert!(svc.connection(&scope, "orders").await.is_err());
    }

    #[tokio::test]
    async fn missing_fields_without_elicitation_is_validation_error() {
        let svc = service(Policy::default()).await;
        let err = svc
            .add_connection(
                &Scope::default(),
                &ConnectionInput {
                    name: "dev".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn list_filters_by_pattern() {
        let svc = service(Policy::default()).await;
        let scope = Scope::default();
        svc.add_connection(&scope, &sqlite_input("dev", "svc_list_a"))
            .await
            .unwrap();
        svc.add_connection(&scope, &sqlite_input("reporting", "svc_list_b"))
            .await
            .unwrap();

        let all = svc
            .list_connectors(&scope, &ListInput::default())
            .await
            .data
            .unwrap();
        assert_eq!(all.len(), 2);

        let filtered = svc
            .list_connectors(
                &scope,
                &ListInput {
                    pattern: "rep".to_string(),
                },
            )
            .await
            .data
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "reporting");
    }

    #[tokio::test]
    async fn empty_tenant_lists_ok_with_no_data() {
        let svc = service(Policy::default()).await;
        let out = svc
            .list_connectors(&Scope::default(), &ListInput::default())
            .await;
        assert_eq!(out.status, "ok");
        assert!(out.data.is_none());
    }

    #[tokio::test]
    async fn remove_is_silent_on_miss() {
        let svc = service(Policy::default()).await;
        let scope = Scope::default();
        svc.remove(&scope, "ghost").await;
        svc.add_connection(&scope, &sqlite_input("dev", "svc_remove"))
            .await
            .unwrap();
        svc.remove(&scope, "dev").await;
        assert!(matches!(
            svc.connection(&scope, "dev").await,
            Err(Error::ConnectorNotFound)
        ));
    }

    #[tokio::test]
    async fn tenants_are_disjoint() {
        let svc = service(oauth_policy()).await;
        let scope_a = Scope::with_token(token_for("a@example.com"));
        let scope_b = Scope::with_token(token_for("b@example.com"));

        svc.add_connection(&scope_a, &sqlite_input("dev", "svc_tenant_a"))
            .await
            .unwrap();

        assert!(svc.connection(&scope_a, "dev").await.is_ok());
        // The same name under another tenant never resolves to A's connector.
        assert!(svc.connection(&scope_b, "dev").await.is_err());
        assert!(svc
            .list_connectors(&scope_b, &ListInput::default())
            .await
            .data
            .is_none());
    }
}
