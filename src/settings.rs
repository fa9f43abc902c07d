use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::authz::generator::AttributeMapping;
use crate::errors::GateError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: Server,
    pub sso: Sso,
    pub authz: Authz,
    pub session: Session,
    pub views: Views,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
    /// If set, this is used as the public base URL the SSO server redirects
    /// back to, e.g. https://console.example.org
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Sso {
    /// Base URL of the SSO server, e.g. https://sso.example.org/cas.
    /// Unset means anonymous mode: every request is admitted as the
    /// anonymous principal, gated only by the static role set.
    pub server_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Authz {
    /// Rule file mapping principal ids to roles/permissions. The suffix
    /// picks the codec: .json, .yml/.yaml, anything else is flat.
    pub rules_file: PathBuf,
    /// Poll interval for rule-file modification.
    pub reload_interval_secs: u64,
    /// Roles that admit a principal to the console. Also the set the
    /// administrator flag is derived from.
    pub admin_roles: Vec<String>,
    /// Roles granted unconditionally to every authenticated principal.
    /// Meant for trust paths; leave empty in normal deployments.
    pub static_roles: Vec<String>,
    /// Attribute-driven grants, applied after the rule file.
    pub attribute_mappings: Vec<AttributeMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Views {
    /// Route the browser is sent to on denial. Never discloses which rule
    /// failed.
    pub failure_route: String,
    /// Optional directory of console static assets served behind the gate.
    pub static_dir: Option<PathBuf>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8444,
            public_base_url: None,
        }
    }
}

impl Default for Authz {
    fn default() -> Self {
        Self {
            rules_file: PathBuf::from("data/users.json"),
            reload_interval_secs: 15,
            admin_roles: vec!["ROLE_ADMIN".to_string()],
            static_roles: Vec::new(),
            attribute_mappings: Vec::new(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

impl Default for Views {
    fn default() -> Self {
        Self {
            failure_route: "/unauthorized".to_string(),
            static_dir: None,
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, GateError> {
        let mut builder = config::Config::builder();

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: PERIHELION__SERVER__PORT=9090, etc.
        builder =
            builder.add_source(config::Environment::with_prefix("PERIHELION").separator("__"));

        let cfg = builder.build()?;
        let mut s: Settings = cfg.try_deserialize()?;

        // Normalize the rule-file path to be relative to the current dir
        if s.authz.rules_file.is_relative() {
            s.authz.rules_file = std::env::current_dir()?.join(&s.authz.rules_file);
        }

        Ok(s)
    }

    pub fn issuer(&self) -> String {
        if let Some(base) = &self.server.public_base_url {
            base.trim_end_matches('/').to_string()
        } else {
            format!("http://{}:{}", self.server.host, self.server.port)
        }
    }

    pub fn admin_roles(&self) -> BTreeSet<String> {
        self.authz.admin_roles.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_settings_load_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nonexistent.toml");

        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");

        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8444);
        assert!(settings.sso.server_url.is_none());
        assert_eq!(settings.authz.admin_roles, vec!["ROLE_ADMIN".to_string()]);
        assert_eq!(settings.authz.reload_interval_secs, 15);
        assert_eq!(settings.session.ttl_secs, 3600);
        assert_eq!(settings.views.failure_route, "/unauthorized");
    }

    #[test]
    fn test_settings_load_from_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[server]
host = "127.0.0.1"
port = 9090

[sso]
server_url = "https://sso.example.org/cas"

[authz]
rules_file = "users.yml"
reload_interval_secs = 5
admin_roles = ["ROLE_ADMIN", "ROLE_OPERATOR"]

[[authz.attribute_mappings]]
attribute = "memberOf"
values = ["console-operators"]
roles = ["ROLE_ADMIN"]
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9090);
        assert_eq!(
            settings.sso.server_url.as_deref(),
            Some("https://sso.example.org/cas")
        );
        assert_eq!(settings.authz.reload_interval_secs, 5);
        assert_eq!(settings.authz.admin_roles.len(), 2);
        assert_eq!(settings.authz.attribute_mappings.len(), 1);
        assert_eq!(settings.authz.attribute_mappings[0].attribute, "memberOf");
        // Relative rule path normalized to absolute
        assert!(settings.authz.rules_file.is_absolute());
        assert!(settings.authz.rules_file.ends_with("users.yml"));
    }

    #[test]
    fn test_settings_env_override() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[server]
host = "127.0.0.1"
port = 8444
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        // public_base_url is only asserted here, so the process-wide env
        // var cannot race the other load tests.
        std::env::set_var(
            "PERIHELION__SERVER__PUBLIC_BASE_URL",
            "https://env.example.org",
        );

        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");
        assert_eq!(
            settings.server.public_base_url.as_deref(),
            Some("https://env.example.org")
        );

        std::env::remove_var("PERIHELION__SERVER__PUBLIC_BASE_URL");
    }

    #[test]
    fn test_settings_issuer() {
        let mut settings = Settings::default();
        settings.server.host = "localhost".to_string();
        settings.server.port = 3000;
        assert_eq!(settings.issuer(), "http://localhost:3000");

        settings.server.public_base_url = Some("https://console.example.org/".to_string());
        assert_eq!(settings.issuer(), "https://console.example.org");
    }
}
