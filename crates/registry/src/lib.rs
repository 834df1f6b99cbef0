mod admin;
mod config;
mod core;
mod elector;
mod error;
mod forward;
mod register;

pub use config::{NodeIdentity, RegistryConfig, DEFAULT_PORT};
pub use self::core::SchemaRegistry;
pub use elector::{LeaderElector, StaticElector};
pub use error::RegistryError;
pub use forward::{ForwardHeaders, LeaderRestClient};

impl SchemaRegistry {
    /// Run leader election now, unless configured to delay it.
    pub async fn init(&self, elector: &dyn LeaderElector) -> Result<(), RegistryError> {
        if !self.config.leader_election_delay {
            elector.init().await?;
        }
        Ok(())
    }

    /// Run a delayed election, once the node is otherwise serving.
    pub async fn post_init(&self, elector: &dyn LeaderElector) -> Result<(), RegistryError> {
        if self.config.leader_election_delay {
            elector.init().await?;
        }
        Ok(())
    }
}
