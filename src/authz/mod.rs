pub mod authorizer;
pub mod errors;
pub mod generator;
pub mod profile;
pub mod rules;
pub mod store;
pub mod watcher;

pub use authorizer::RoleAuthorizer;
pub use errors::AuthzError;
pub use generator::{AuthorizationGenerator, GeneratorChain};
pub use profile::Profile;
pub use rules::{RuleEntry, RuleFormat, RuleSource, RuleTable};
pub use store::RuleStore;
pub use watcher::RuleWatcher;
