use std::fmt;
use std::sync::Arc;

use crate::authn::{AuthenticatedUser, IdentityClient};
use crate::authz::{GeneratorChain, Profile, RoleAuthorizer};
use crate::session::SessionStore;

/// The single-sign-on ticket parameter. Stripped from the callback URL
/// before the browser can cache or redisplay it.
pub const TICKET_PARAM: &str = "ticket";

/// Per-request progression. Terminal states are `Granted` and `Denied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unauthenticated,
    Authenticating,
    Authorizing,
    Granted,
    Denied,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateState::Unauthenticated => "unauthenticated",
            GateState::Authenticating => "authenticating",
            GateState::Authorizing => "authorizing",
            GateState::Granted => "granted",
            GateState::Denied => "denied",
        };
        f.write_str(s)
    }
}

/// What the web layer should do with the request.
#[derive(Debug)]
pub enum GateOutcome {
    /// Run the protected handler as this profile.
    Admit {
        profile: Profile,
        set_cookie: Option<String>,
    },
    /// Send the browser elsewhere: the SSO login page, or the same URL
    /// with the ticket parameter removed.
    Redirect {
        location: String,
        set_cookie: Option<String>,
    },
    /// Admission refused. The web layer picks the rendering; the reason
    /// stays in the log.
    Denied,
}

/// The request fields the gate decides on.
pub struct RequestContext<'a> {
    pub session_id: Option<String>,
    /// Path plus raw query, e.g. `/services?ticket=ST-1&page=2`.
    pub path_and_query: &'a str,
    /// Scheme and authority the service is reached under, no trailing
    /// slash, e.g. `https://console.example.org`.
    pub service_base: &'a str,
}

/// Orchestrates authentication, enrichment, and admission per request.
pub struct SecurityGate {
    chain: GeneratorChain,
    authorizer: RoleAuthorizer,
    identity: Option<Arc<dyn IdentityClient>>,
    sessions: Arc<SessionStore>,
    secure_cookies: bool,
}

impl SecurityGate {
    pub fn new(
        chain: GeneratorChain,
        authorizer: RoleAuthorizer,
        identity: Option<Arc<dyn IdentityClient>>,
        sessions: Arc<SessionStore>,
        secure_cookies: bool,
    ) -> Self {
        Self {
            chain,
            authorizer,
            identity,
            sessions,
            secure_cookies,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn handle(&self, ctx: RequestContext<'_>) -> GateOutcome {
        let mut state = GateState::Unauthenticated;
        tracing::trace!(%state, url = ctx.path_and_query, "Gate entered");

        // A cached profile skips authentication and authorization entirely.
        // Rule reloads therefore apply from the next authentication on.
        if let Some(session_id) = ctx.session_id.as_deref() {
            if let Some(profile) = self.sessions.get(session_id) {
                state = GateState::Granted;
                tracing::debug!(principal = profile.id(), %state, "Reusing cached profile");
                if ticket_param(ctx.path_and_query).is_some() {
                    return GateOutcome::Redirect {
                        location: strip_ticket(ctx.path_and_query),
                        set_cookie: None,
                    };
                }
                return GateOutcome::Admit {
                    profile,
                    set_cookie: None,
                };
            }
        }

        state = GateState::Authenticating;
        tracing::debug!(%state, "No cached profile, authenticating");
        let had_ticket = ticket_param(ctx.path_and_query).is_some();
        let clean_url = strip_ticket(ctx.path_and_query);

        let user = match &self.identity {
            Some(client) => {
                let Some(ticket) = ticket_param(ctx.path_and_query) else {
                    let service = format!("{}{}", ctx.service_base, clean_url);
                    let location = format!(
                        "{}?service={}",
                        client.login_url(),
                        urlencoding::encode(&service)
                    );
                    return GateOutcome::Redirect {
                        location,
                        set_cookie: None,
                    };
                };
                let service = format!("{}{}", ctx.service_base, clean_url);
                match client.validate(&ticket, &service).await {
                    Ok(user) => user,
                    Err(e) => {
                        state = GateState::Denied;
                        tracing::warn!(error = %e, %state, "Ticket validation failed");
                        return GateOutcome::Denied;
                    }
                }
            }
            // No identity server configured: anonymous admission. The
            // operator was warned at startup; the static-role generator
            // decides what an anonymous principal may do.
            None => AuthenticatedUser {
                id: "anonymous".to_string(),
                attributes: Default::default(),
            },
        };

        state = GateState::Authorizing;
        tracing::debug!(principal = %user.id, %state, "Authenticated, running generator chain");

        let mut profile = Profile::new(user.id).with_attributes(user.attributes);
        if let Some(client) = &self.identity {
            profile = profile.with_client_name(client.client_name());
        }
        self.chain.generate(&mut profile);

        if !self.authorizer.authorize(&profile) {
            state = GateState::Denied;
            tracing::debug!(principal = profile.id(), %state, "Admission refused");
            return GateOutcome::Denied;
        }

        state = GateState::Granted;
        tracing::info!(principal = profile.id(), %state, "Admission granted");

        let cookie = self.sessions.create(profile.clone());
        let set_cookie =
            Some(cookie.to_cookie_header(self.secure_cookies, self.sessions.ttl_secs()));

        if had_ticket {
            // Redirect, not a forward: the browser must land on a URL the
            // ticket can no longer be replayed from.
            GateOutcome::Redirect {
                location: clean_url,
                set_cookie,
            }
        } else {
            GateOutcome::Admit {
                profile,
                set_cookie,
            }
        }
    }
}

/// Value of the ticket parameter, if present.
pub fn ticket_param(path_and_query: &str) -> Option<String> {
    let (_, query) = path_and_query.split_once('?')?;
    for pair in query.split('&') {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        if name == TICKET_PARAM {
            return Some(
                urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_string()),
            );
        }
    }
    None
}

/// Same URL with exactly the ticket parameter removed. Other parameters
/// keep their order and their original encoding.
pub fn strip_ticket(path_and_query: &str) -> String {
    let Some((path, query)) = path_and_query.split_once('?') else {
        return path_and_query.to_string();
    };

    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let name = pair.split_once('=').map(|(n, _)| n).unwrap_or(pair);
            name != TICKET_PARAM
        })
        .collect();

    if kept.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, kept.join("&"))
    }
}
