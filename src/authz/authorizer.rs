use std::collections::BTreeSet;

use crate::authz::profile::Profile;

/// Terminal admission check: does the enriched profile hold any of the
/// required roles.
pub struct RoleAuthorizer {
    required: BTreeSet<String>,
}

impl RoleAuthorizer {
    pub fn new(required: BTreeSet<String>) -> Self {
        Self { required }
    }

    pub fn required(&self) -> &BTreeSet<String> {
        &self.required
    }

    /// True iff the profile's roles intersect the required set. An empty
    /// required set never authorizes. Both outcomes are logged without
    /// altering the decision.
    pub fn authorize(&self, profile: &Profile) -> bool {
        let matched = self.required.iter().find(|r| profile.has_role(r));
        match matched {
            Some(role) => {
                tracing::debug!(
                    principal = profile.id(),
                    role = %role,
                    "Successfully authorized access, matched required role"
                );
                true
            }
            None => {
                tracing::warn!(
                    principal = profile.id(),
                    required = ?self.required,
                    held = ?profile.roles(),
                    "Unable to authorize access, profile does not hold any required role"
                );
                false
            }
        }
    }
}
