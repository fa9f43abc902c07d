use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authz::profile::Profile;
use crate::authz::store::RuleStore;

/// One enrichment step applied to a freshly authenticated profile.
///
/// Generators only add roles/permissions; the `Profile` type exposes no
/// removal operation, so the accumulate-only contract holds by
/// construction.
pub trait AuthorizationGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    fn generate(&self, profile: &mut Profile);
}

/// Grants whatever the current rule table says about `profile.id`.
/// An absent principal is a no-op, not an error.
pub struct RuleSourceGenerator {
    store: Arc<RuleStore>,
}

impl RuleSourceGenerator {
    pub fn new(store: Arc<RuleStore>) -> Self {
        Self { store }
    }
}

impl AuthorizationGenerator for RuleSourceGenerator {
    fn name(&self) -> &'static str {
        "rule-source"
    }

    fn generate(&self, profile: &mut Profile) {
        let table = self.store.snapshot();
        match table.lookup(profile.id()) {
            Some(entry) => {
                tracing::debug!(
                    principal = profile.id(),
                    roles = entry.roles.len(),
                    permissions = entry.permissions.len(),
                    "Applying rule table entry"
                );
                profile.add_roles(entry.roles.iter().cloned());
                profile.add_permissions(entry.permissions.iter().cloned());
            }
            None => {
                tracing::debug!(principal = profile.id(), "No rule table entry for principal");
            }
        }
    }
}

/// Unconditionally grants a fixed role set. Used for trust paths such as
/// network-origin admission, where authentication itself conveys the role.
pub struct StaticRoleGenerator {
    roles: BTreeSet<String>,
}

impl StaticRoleGenerator {
    pub fn new(roles: BTreeSet<String>) -> Self {
        Self { roles }
    }
}

impl AuthorizationGenerator for StaticRoleGenerator {
    fn name(&self) -> &'static str {
        "static-role"
    }

    fn generate(&self, profile: &mut Profile) {
        profile.add_roles(self.roles.iter().cloned());
    }
}

/// Grants roles when a named profile attribute takes one of the accepted
/// values. String attributes match directly; array attributes match if any
/// element does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeMapping {
    pub attribute: String,
    pub values: BTreeSet<String>,
    pub roles: BTreeSet<String>,
}

pub struct AttributeMappingGenerator {
    mappings: Vec<AttributeMapping>,
}

impl AttributeMappingGenerator {
    pub fn new(mappings: Vec<AttributeMapping>) -> Self {
        Self { mappings }
    }
}

impl AuthorizationGenerator for AttributeMappingGenerator {
    fn name(&self) -> &'static str {
        "attribute-mapping"
    }

    fn generate(&self, profile: &mut Profile) {
        for mapping in &self.mappings {
            let Some(value) = profile.attribute(&mapping.attribute) else {
                continue;
            };
            if attribute_matches(value, &mapping.values) {
                tracing::debug!(
                    principal = profile.id(),
                    attribute = %mapping.attribute,
                    "Attribute mapping matched"
                );
                profile.add_roles(mapping.roles.iter().cloned());
            }
        }
    }
}

fn attribute_matches(value: &Value, accepted: &BTreeSet<String>) -> bool {
    match value {
        Value::String(s) => accepted.contains(s),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .any(|s| accepted.contains(s)),
        _ => false,
    }
}

/// Ordered composition of generators, fixed at setup time and applied once
/// per authentication. Accumulation is set-union, so the final role and
/// permission sets do not depend on registration order.
#[derive(Default)]
pub struct GeneratorChain {
    generators: Vec<Box<dyn AuthorizationGenerator>>,
}

impl GeneratorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a generator. Construction time only — the chain is immutable
    /// once request processing starts.
    pub fn add(mut self, generator: Box<dyn AuthorizationGenerator>) -> Self {
        self.generators.push(generator);
        self
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    pub fn generate(&self, profile: &mut Profile) {
        for generator in &self.generators {
            tracing::debug!(generator = generator.name(), principal = profile.id(), "Running authorization generator");
            generator.generate(profile);
        }
    }
}
