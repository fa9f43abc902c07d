use std::collections::BTreeMap;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthnError {
    #[error("Identity server unreachable: {0}")]
    #[diagnostic(code(perihelion::authn::transport))]
    Transport(String),

    #[error("Ticket rejected by identity server: {code} ({description})")]
    #[diagnostic(code(perihelion::authn::rejected))]
    Rejected { code: String, description: String },

    #[error("Malformed validation response: {0}")]
    #[diagnostic(code(perihelion::authn::malformed))]
    Malformed(String),
}

/// Identity established by the external SSO server for one ticket.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: String,
    pub attributes: BTreeMap<String, Value>,
}

/// External identity collaborator. The gate only ever talks to this trait;
/// tests substitute a stub.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    fn client_name(&self) -> &str;

    /// Login page of the identity server; the gate redirects here with a
    /// `service` callback parameter when no ticket is present.
    fn login_url(&self) -> &str;

    /// Exchange a one-time ticket for the authenticated identity. The
    /// `service` URL must match the callback the ticket was issued for.
    async fn validate(&self, ticket: &str, service: &str)
        -> Result<AuthenticatedUser, AuthnError>;
}

/// CAS-protocol identity client using the JSON rendering of the v3
/// validation endpoint.
pub struct CasIdentityClient {
    http: reqwest::Client,
    server_url: String,
    login_url: String,
}

impl CasIdentityClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        let login_url = format!("{server_url}/login");
        Self {
            http: reqwest::Client::new(),
            server_url,
            login_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CasResponse {
    #[serde(rename = "serviceResponse")]
    service_response: CasResponseBody,
}

#[derive(Debug, Deserialize)]
struct CasResponseBody {
    #[serde(rename = "authenticationSuccess")]
    success: Option<CasSuccess>,
    #[serde(rename = "authenticationFailure")]
    failure: Option<CasFailure>,
}

#[derive(Debug, Deserialize)]
struct CasSuccess {
    user: String,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CasFailure {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[async_trait]
impl IdentityClient for CasIdentityClient {
    fn client_name(&self) -> &str {
        "CasClient"
    }

    fn login_url(&self) -> &str {
        &self.login_url
    }

    async fn validate(
        &self,
        ticket: &str,
        service: &str,
    ) -> Result<AuthenticatedUser, AuthnError> {
        let url = format!("{}/p3/serviceValidate", self.server_url);
        let response = self
            .http
            .get(&url)
            .query(&[("service", service), ("ticket", ticket), ("format", "JSON")])
            .send()
            .await
            .map_err(|e| AuthnError::Transport(e.to_string()))?;

        let body: CasResponse = response
            .json()
            .await
            .map_err(|e| AuthnError::Malformed(e.to_string()))?;

        if let Some(success) = body.service_response.success {
            tracing::debug!(user = %success.user, "Ticket validation succeeded");
            return Ok(AuthenticatedUser {
                id: success.user,
                attributes: success.attributes,
            });
        }
        if let Some(failure) = body.service_response.failure {
            return Err(AuthnError::Rejected {
                code: failure.code,
                description: failure.description,
            });
        }
        Err(AuthnError::Malformed(
            "response carries neither authenticationSuccess nor authenticationFailure".to_string(),
        ))
    }
}
