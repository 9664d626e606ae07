use std::sync::Arc;
use tokio::task::JoinHandle;
use yard_orchestrator::Coordinator;
use yard_provider::{ContainerDriver, TemplateDriver};
use yard_store::Store;
use yard_sync::Synchronizer;
use yard_templates::{Pipeline, StackCatalog};

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub coordinator: Coordinator,
    pub pipeline: Pipeline,
}

impl AppState {
    pub fn new(
        store: Store,
        containers: Arc<dyn ContainerDriver>,
        templates: Arc<dyn TemplateDriver>,
        catalog: StackCatalog,
        config: &Config,
    ) -> Self {
        let sync = Synchronizer::new(config.sync_config());
        Self {
            coordinator: Coordinator::new(
                store.clone(),
                sync,
                containers,
                config.coordinator_config(),
            ),
            pipeline: Pipeline::new(store.clone(), templates, catalog),
            store,
        }
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        self.coordinator.synchronizer()
    }

    /// Heartbeat monitor and intent watchdog. Both run until the process exits.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.coordinator.spawn_heartbeat_monitor(),
            self.coordinator.spawn_intent_watchdog(),
        ]
    }
}
