//! HTTP surface of the gateway. Every route under the gate middleware is
//! reached only with an admitted profile in the request extensions; the
//! public routes are the failure view, logout, and the status probe.
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use miette::IntoDiagnostic;
use serde_json::json;
use std::net::SocketAddr;
use tower_http::services::ServeDir;

use crate::authn::{CasIdentityClient, IdentityClient};
use crate::authz::generator::{
    AttributeMappingGenerator, RuleSourceGenerator, StaticRoleGenerator,
};
use crate::authz::{GeneratorChain, Profile, RoleAuthorizer, RuleSource, RuleStore, RuleWatcher};
use crate::gate::{GateOutcome, RequestContext, SecurityGate};
use crate::session::{SessionCookie, SessionStore};
use crate::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub gate: Arc<SecurityGate>,
    pub store: Arc<RuleStore>,
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static(
            "default-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data:; form-action 'self'",
        ),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

/// The gate itself, as axum middleware. Every fault is converted here into
/// a redirect or a structured error response — nothing propagates to the
/// host process.
async fn security_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let wants_html = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("text/html"))
        .unwrap_or(false);

    let session_id =
        SessionCookie::from_headers(request.headers()).map(|cookie| cookie.session_id);
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let service_base = state.settings.issuer();

    let outcome = state
        .gate
        .handle(RequestContext {
            session_id,
            path_and_query: &path_and_query,
            service_base: &service_base,
        })
        .await;

    match outcome {
        GateOutcome::Admit {
            profile,
            set_cookie,
        } => {
            let mut request = request;
            request.extensions_mut().insert(profile);
            with_cookie(next.run(request).await, set_cookie)
        }
        GateOutcome::Redirect {
            location,
            set_cookie,
        } => with_cookie(Redirect::temporary(&location).into_response(), set_cookie),
        GateOutcome::Denied => denial_response(wants_html, &state.settings.views.failure_route),
    }
}

fn with_cookie(mut response: Response, set_cookie: Option<String>) -> Response {
    if let Some(cookie) = set_cookie {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

/// Browsers get the failure view; API clients get a structured 403. The
/// body never says which rule failed.
fn denial_response(wants_html: bool, failure_route: &str) -> Response {
    if wants_html {
        Redirect::temporary(failure_route).into_response()
    } else {
        (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "access_denied" })),
        )
            .into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let mut protected = Router::new().route("/", get(console_home));
    if let Some(static_dir) = &state.settings.views.static_dir {
        protected = protected.nest_service("/static", ServeDir::new(static_dir));
    }
    let protected =
        protected.route_layer(middleware::from_fn_with_state(state.clone(), security_gate));

    Router::new()
        .merge(protected)
        .route("/status", get(status))
        .route("/unauthorized", get(unauthorized))
        .route("/logout", get(logout))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

pub async fn serve(settings: Settings) -> miette::Result<()> {
    let settings = Arc::new(settings);

    // Rule table starts empty; the watcher's first tick performs the
    // initial load and keeps polling for the process lifetime.
    let store = Arc::new(RuleStore::empty());
    let source = RuleSource::for_path(&settings.authz.rules_file);
    RuleWatcher::for_store(
        settings.authz.rules_file.clone(),
        Duration::from_secs(settings.authz.reload_interval_secs),
        source,
        store.clone(),
    )
    .spawn();

    let identity: Option<Arc<dyn IdentityClient>> = match &settings.sso.server_url {
        Some(url) => {
            tracing::info!(sso = %url, "Configuring SSO authentication");
            Some(Arc::new(CasIdentityClient::new(url.clone())))
        }
        None => {
            tracing::warn!(
                "No SSO server is configured; requests are admitted anonymously. \
                 This is NOT relevant for production purposes — configure [sso] for maximum security."
            );
            None
        }
    };

    let gate = Arc::new(build_gate(&settings, identity, store.clone()));

    let state = AppState {
        settings: settings.clone(),
        gate,
        store,
    };
    let router = build_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;
    tracing::info!(%addr, "Management console gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, router).await.into_diagnostic()?;
    Ok(())
}

/// Generator chain and authorizer, assembled once at setup. The chain is
/// immutable afterwards: rule-file lookups first, then attribute-driven
/// grants, then the unconditional trust-path roles. Anonymous mode admits
/// through the static generator carrying the admin roles.
pub fn build_gate(
    settings: &Settings,
    identity: Option<Arc<dyn IdentityClient>>,
    store: Arc<RuleStore>,
) -> SecurityGate {
    let mut chain = GeneratorChain::new().add(Box::new(RuleSourceGenerator::new(store)));
    if !settings.authz.attribute_mappings.is_empty() {
        chain = chain.add(Box::new(AttributeMappingGenerator::new(
            settings.authz.attribute_mappings.clone(),
        )));
    }
    if !settings.authz.static_roles.is_empty() {
        chain = chain.add(Box::new(StaticRoleGenerator::new(
            settings.authz.static_roles.iter().cloned().collect(),
        )));
    }
    if identity.is_none() {
        chain = chain.add(Box::new(StaticRoleGenerator::new(settings.admin_roles())));
    }

    let authorizer = RoleAuthorizer::new(settings.admin_roles());
    let sessions = Arc::new(SessionStore::new(settings.session.ttl_secs));
    let secure_cookies = settings.issuer().starts_with("https://");

    SecurityGate::new(chain, authorizer, identity, sessions, secure_cookies)
}

async fn console_home(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
) -> impl IntoResponse {
    let admin = profile.is_administrator(&state.settings.admin_roles());
    let roles = profile
        .roles()
        .iter()
        .map(|r| format!("<li>{}</li>", escape_html(r)))
        .collect::<String>();

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Service Management</title></head>
<body>
<h1>Service Management Console</h1>
<p>Signed in as <strong>{}</strong>{}</p>
<ul>{}</ul>
<p><a href="/logout">Log out</a></p>
</body>
</html>"#,
        escape_html(profile.id()),
        if admin { " (administrator)" } else { "" },
        roles,
    ))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "rule_principals": state.store.snapshot().len(),
        "active_sessions": state.gate.sessions().len(),
    }))
}

async fn unauthorized() -> impl IntoResponse {
    (
        StatusCode::FORBIDDEN,
        Html(
            r#"<!DOCTYPE html>
<html>
<head><title>Access Denied</title></head>
<body>
<h1>Access Denied</h1>
<p>You are not authorized to use the management console.</p>
</body>
</html>"#,
        ),
    )
}

async fn logout(State(state): State<AppState>, request: Request) -> impl IntoResponse {
    if let Some(cookie) = SessionCookie::from_headers(request.headers()) {
        state.gate.sessions().remove(&cookie.session_id);
    }
    let location = match &state.settings.sso.server_url {
        Some(url) => format!("{}/logout", url.trim_end_matches('/')),
        None => state.settings.views.failure_route.clone(),
    };
    let mut response = Redirect::temporary(&location).into_response();
    if let Ok(value) = HeaderValue::from_str(&SessionCookie::delete_cookie_header()) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
