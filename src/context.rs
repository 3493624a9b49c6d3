//! Ledger context shared by subscriptions.
//!
//! The context bundles the ledger client, the parties of the current session
//! and the subscription configuration. It is passed explicitly to every
//! controller and coordinator at construction.

use crate::client::LedgerClient;
use crate::error::{LedgerError, Result};
use crate::subscriptions::{StreamCoordinator, SubscriptionController};
use crate::types::{Contract, ContractId, Party, StreamDescriptor, TemplateId};
use crate::view::MaterializedView;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Subscription configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Delay before reconnecting a failed stream, in milliseconds.
    /// Default: 5000
    pub reconnect_delay_ms: u64,

    /// Max buffered updates per watcher before the watcher is dropped.
    /// Default: 1000
    pub watcher_buffer: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5_000,
            watcher_buffer: 1000,
        }
    }
}

impl LedgerConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: LedgerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.watcher_buffer == 0 {
            return Err(LedgerError::InvalidConfig(
                "watcher_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Explicit ledger context: client, session parties and configuration.
#[derive(Clone)]
pub struct LedgerContext {
    client: Arc<dyn LedgerClient>,
    parties: Vec<Party>,
    config: LedgerConfig,
}

impl LedgerContext {
    /// Create a context for a session acting as `parties`.
    pub fn new(client: Arc<dyn LedgerClient>, parties: Vec<Party>) -> Self {
        Self {
            client,
            parties,
            config: LedgerConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn client(&self) -> &Arc<dyn LedgerClient> {
        &self.client
    }

    /// Parties granted to the current session.
    pub fn parties(&self) -> &[Party] {
        &self.parties
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Validate a descriptor and fill in session defaults.
    ///
    /// Errors here are consumer mistakes and are never retried.
    pub fn resolve(&self, descriptor: &StreamDescriptor) -> Result<StreamDescriptor> {
        if descriptor.template_id.as_str().is_empty() {
            return Err(LedgerError::InvalidDescriptor(
                "template id is empty".to_string(),
            ));
        }

        if let Some(query) = &descriptor.query {
            if !query.is_object() {
                return Err(LedgerError::InvalidDescriptor(format!(
                    "query for {} must be a JSON object",
                    descriptor.template_id
                )));
            }
        }

        let mut resolved = descriptor.clone();
        let parties = resolved
            .acting_parties
            .take()
            .unwrap_or_else(|| self.parties.clone());
        if parties.is_empty() {
            return Err(LedgerError::NoActingParties(descriptor.template_id.clone()));
        }
        resolved.acting_parties = Some(parties);

        Ok(resolved)
    }

    /// Create a controller and start it.
    pub fn subscribe(&self, descriptor: StreamDescriptor) -> Result<SubscriptionController> {
        let mut controller = SubscriptionController::new(self);
        controller.start(descriptor)?;
        Ok(controller)
    }

    /// Create a coordinator over several templates and start it.
    pub fn subscribe_many(
        &self,
        descriptors: BTreeMap<TemplateId, StreamDescriptor>,
    ) -> Result<StreamCoordinator> {
        let mut coordinator = StreamCoordinator::new(self);
        coordinator.start(descriptors)?;
        Ok(coordinator)
    }

    /// One-shot query of the active contracts matching a descriptor.
    pub fn query(&self, descriptor: &StreamDescriptor) -> Result<MaterializedView> {
        let resolved = self.resolve(descriptor)?;
        let contracts = self.client.query(&resolved)?;
        Ok(contracts.into_iter().collect())
    }

    /// One-shot lookup of a single active contract.
    pub fn fetch(&self, template_id: &TemplateId, id: &ContractId) -> Result<Option<Contract>> {
        let view = self.query(&StreamDescriptor::new(template_id.clone()))?;
        Ok(view.get(id).cloned())
    }
}
