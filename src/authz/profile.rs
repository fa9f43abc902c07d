use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

/// Accumulated principal data built during one authentication event.
///
/// Roles and permissions only ever grow: the generator chain calls the
/// additive methods below and no removal operation exists on this type.
/// The profile lives in the session store until logout or expiry; it is
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    id: String,
    attributes: BTreeMap<String, Value>,
    roles: BTreeSet<String>,
    permissions: BTreeSet<String>,
    client_name: Option<String>,
    linked_id: Option<String>,
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            client_name: None,
            linked_id: None,
        }
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = Some(client_name.into());
        self
    }

    pub fn with_linked_id(mut self, linked_id: impl Into<String>) -> Self {
        self.linked_id = Some(linked_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    pub fn linked_id(&self) -> Option<&str> {
        self.linked_id.as_deref()
    }

    pub fn add_role(&mut self, role: impl Into<String>) {
        self.roles.insert(role.into());
    }

    pub fn add_roles<I, S>(&mut self, roles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
    }

    pub fn add_permissions<I, S>(&mut self, permissions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// True when the profile holds at least one of the configured admin roles.
    pub fn is_administrator(&self, admin_roles: &BTreeSet<String>) -> bool {
        admin_roles.iter().any(|r| self.roles.contains(r))
    }

    pub fn department(&self) -> Option<String> {
        self.first_attribute(&["department", "ou"])
    }

    pub fn phone(&self) -> Option<String> {
        self.first_attribute(&[
            "phone",
            "phoneNumber",
            "telephoneNumber",
            "primaryPhone",
            "primaryPhoneNumber",
        ])
    }

    /// First attribute whose key matches one of the given names, rendered
    /// as a display string.
    fn first_attribute(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|k| self.attributes.get(*k))
            .map(display_value)
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roles_accumulate() {
        let mut p = Profile::new("alice");
        p.add_roles(["ROLE_USER"]);
        p.add_roles(["ROLE_ADMIN", "ROLE_USER"]);
        assert_eq!(p.roles().len(), 2);
        assert!(p.has_role("ROLE_ADMIN"));
        assert!(p.has_role("ROLE_USER"));
    }

    #[test]
    fn test_administrator_flag() {
        let admin_roles: BTreeSet<String> = ["ROLE_ADMIN".to_string()].into();
        let mut p = Profile::new("alice");
        assert!(!p.is_administrator(&admin_roles));
        p.add_role("ROLE_ADMIN");
        assert!(p.is_administrator(&admin_roles));
    }

    #[test]
    fn test_attribute_accessors() {
        let attrs: BTreeMap<String, Value> = [
            ("ou".to_string(), json!("engineering")),
            ("telephoneNumber".to_string(), json!("555-0100")),
        ]
        .into();
        let p = Profile::new("alice").with_attributes(attrs);
        assert_eq!(p.department().as_deref(), Some("engineering"));
        assert_eq!(p.phone().as_deref(), Some("555-0100"));
    }

    #[test]
    fn test_missing_attributes() {
        let p = Profile::new("alice");
        assert!(p.department().is_none());
        assert!(p.phone().is_none());
    }
}
