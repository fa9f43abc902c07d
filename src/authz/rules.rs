use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::authz::errors::AuthzError;

/// Roles and permissions granted to a single principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

/// Immutable mapping of principal id to granted roles/permissions.
///
/// Rebuilt wholesale on every successful reload and swapped in atomically
/// by the rule store — never patched in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    entries: BTreeMap<String, RuleEntry>,
}

impl RuleTable {
    pub fn new(entries: BTreeMap<String, RuleEntry>) -> Self {
        Self { entries }
    }

    /// Exact string match on the principal id.
    pub fn lookup(&self, id: &str) -> Option<&RuleEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, RuleEntry> {
        &self.entries
    }
}

/// Rule-file codec, fixed once at construction by the resource suffix:
/// `.json` is relaxed JSON (comments tolerated), `.yml`/`.yaml` is YAML,
/// anything else is flat `principal=role1,role2` lines (roles only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    Json,
    Yaml,
    Flat,
}

impl RuleFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => RuleFormat::Json,
            Some("yml") | Some("yaml") => RuleFormat::Yaml,
            _ => RuleFormat::Flat,
        }
    }

    fn name(self) -> &'static str {
        match self {
            RuleFormat::Json => "JSON",
            RuleFormat::Yaml => "YAML",
            RuleFormat::Flat => "flat",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RuleSource {
    format: RuleFormat,
}

impl RuleSource {
    pub fn new(format: RuleFormat) -> Self {
        Self { format }
    }

    pub fn for_path(path: &Path) -> Self {
        Self::new(RuleFormat::for_path(path))
    }

    pub fn format(&self) -> RuleFormat {
        self.format
    }

    /// Parse rule-file bytes into a table. A `Parse` error here is caught
    /// by the watcher, which keeps serving the previous good table.
    pub fn parse(&self, bytes: &[u8]) -> Result<RuleTable, AuthzError> {
        let text = std::str::from_utf8(bytes).map_err(|e| AuthzError::Parse {
            format: self.format.name(),
            message: format!("rule file is not valid UTF-8: {e}"),
        })?;

        let entries = match self.format {
            RuleFormat::Json => serde_json::from_str(&strip_json_comments(text)).map_err(|e| {
                AuthzError::Parse {
                    format: self.format.name(),
                    message: e.to_string(),
                }
            })?,
            RuleFormat::Yaml => {
                serde_yaml::from_str(text).map_err(|e| AuthzError::Parse {
                    format: self.format.name(),
                    message: e.to_string(),
                })?
            }
            RuleFormat::Flat => parse_flat(text)?,
        };

        Ok(RuleTable::new(entries))
    }

    pub fn serialize(&self, table: &RuleTable) -> Result<String, AuthzError> {
        match self.format {
            RuleFormat::Json => {
                serde_json::to_string_pretty(table.entries()).map_err(|e| AuthzError::Parse {
                    format: self.format.name(),
                    message: e.to_string(),
                })
            }
            RuleFormat::Yaml => {
                serde_yaml::to_string(table.entries()).map_err(|e| AuthzError::Parse {
                    format: self.format.name(),
                    message: e.to_string(),
                })
            }
            RuleFormat::Flat => {
                let mut out = String::new();
                for (id, entry) in table.entries() {
                    out.push_str(id);
                    out.push('=');
                    out.push_str(&entry.roles.iter().cloned().collect::<Vec<_>>().join(","));
                    out.push('\n');
                }
                Ok(out)
            }
        }
    }
}

/// Strip `//` line comments and `/* */` block comments, leaving string
/// literals untouched. serde_json handles the rest.
fn strip_json_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Line-oriented `principal-id=role1,role2`. Blank lines and `#` comments
/// are skipped; this variant carries no permissions.
fn parse_flat(text: &str) -> Result<BTreeMap<String, RuleEntry>, AuthzError> {
    let mut entries = BTreeMap::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (id, roles) = line.split_once('=').ok_or_else(|| AuthzError::Parse {
            format: "flat",
            message: format!("line {}: expected `principal=role1,role2`", lineno + 1),
        })?;
        let id = id.trim();
        if id.is_empty() {
            return Err(AuthzError::Parse {
                format: "flat",
                message: format!("line {}: empty principal id", lineno + 1),
            });
        }

        let roles: BTreeSet<String> = roles
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();

        entries.insert(
            id.to_string(),
            RuleEntry {
                roles,
                permissions: BTreeSet::new(),
            },
        );
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_format_for_path() {
        assert_eq!(RuleFormat::for_path(Path::new("users.json")), RuleFormat::Json);
        assert_eq!(RuleFormat::for_path(Path::new("users.yml")), RuleFormat::Yaml);
        assert_eq!(RuleFormat::for_path(Path::new("users.yaml")), RuleFormat::Yaml);
        assert_eq!(RuleFormat::for_path(Path::new("users.properties")), RuleFormat::Flat);
        assert_eq!(RuleFormat::for_path(Path::new("users")), RuleFormat::Flat);
    }

    #[test]
    fn test_parse_json() {
        let source = RuleSource::new(RuleFormat::Json);
        let table = source
            .parse(br#"{"alice": {"roles": ["ROLE_ADMIN"], "permissions": ["services:write"]}}"#)
            .unwrap();
        let entry = table.lookup("alice").unwrap();
        assert_eq!(entry.roles, roles(&["ROLE_ADMIN"]));
        assert_eq!(entry.permissions, roles(&["services:write"]));
        assert!(table.lookup("bob").is_none());
    }

    #[test]
    fn test_parse_json_with_comments() {
        let source = RuleSource::new(RuleFormat::Json);
        let table = source
            .parse(
                br#"
// operators of the console
{
    /* admins */
    "alice": {"roles": ["ROLE_ADMIN"]},
    "carol": {"roles": ["ROLE_USER"]} // slashes in "urls://" stay intact
}
"#,
            )
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("alice").unwrap().roles, roles(&["ROLE_ADMIN"]));
    }

    #[test]
    fn test_comment_stripping_preserves_strings() {
        let source = RuleSource::new(RuleFormat::Json);
        let table = source
            .parse(br#"{"http://idp/alice": {"roles": ["ROLE_ADMIN"]}}"#)
            .unwrap();
        assert!(table.lookup("http://idp/alice").is_some());
    }

    #[test]
    fn test_parse_yaml() {
        let source = RuleSource::new(RuleFormat::Yaml);
        let table = source
            .parse(
                b"alice:\n  roles:\n    - ROLE_ADMIN\n  permissions:\n    - services:write\nbob:\n  roles:\n    - ROLE_USER\n",
            )
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("bob").unwrap().roles, roles(&["ROLE_USER"]));
        assert!(table.lookup("bob").unwrap().permissions.is_empty());
    }

    #[test]
    fn test_parse_flat() {
        let source = RuleSource::new(RuleFormat::Flat);
        let table = source
            .parse(b"# console users\nalice=ROLE_ADMIN,ROLE_USER\n\nbob=ROLE_USER\n")
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.lookup("alice").unwrap().roles,
            roles(&["ROLE_ADMIN", "ROLE_USER"])
        );
        assert!(table.lookup("alice").unwrap().permissions.is_empty());
    }

    #[test]
    fn test_parse_flat_rejects_bare_line() {
        let source = RuleSource::new(RuleFormat::Flat);
        let err = source.parse(b"alice ROLE_ADMIN\n").unwrap_err();
        assert!(matches!(err, AuthzError::Parse { format: "flat", .. }));
    }

    #[test]
    fn test_parse_malformed_json() {
        let source = RuleSource::new(RuleFormat::Json);
        assert!(source.parse(b"{\"alice\": {\"roles\": [").is_err());
    }

    #[test]
    fn test_round_trip_json_and_yaml() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "alice".to_string(),
            RuleEntry {
                roles: roles(&["ROLE_ADMIN", "ROLE_USER"]),
                permissions: roles(&["services:write"]),
            },
        );
        entries.insert(
            "bob".to_string(),
            RuleEntry {
                roles: roles(&["ROLE_USER"]),
                permissions: BTreeSet::new(),
            },
        );
        let table = RuleTable::new(entries);

        for format in [RuleFormat::Json, RuleFormat::Yaml] {
            let source = RuleSource::new(format);
            let text = source.serialize(&table).unwrap();
            let reparsed = source.parse(text.as_bytes()).unwrap();
            assert_eq!(reparsed, table);
        }
    }

    #[test]
    fn test_round_trip_flat_roles_only() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "alice".to_string(),
            RuleEntry {
                roles: roles(&["ROLE_ADMIN"]),
                permissions: BTreeSet::new(),
            },
        );
        let table = RuleTable::new(entries);

        let source = RuleSource::new(RuleFormat::Flat);
        let text = source.serialize(&table).unwrap();
        assert_eq!(source.parse(text.as_bytes()).unwrap(), table);
    }
}
