use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::assistant::{AssistantPipeline, AssistantSettings};
use crate::collaborators::{
    Authenticator, GatewayAuthenticator, LanguageModel, PageFetcher, QuotaGate, SearchIndex,
    UnlimitedQuota,
};
use crate::config::ServerConfig;
use crate::events::EventBus;
use crate::history::HistoryStore;
use crate::registry::{RegistryDeps, RoomRegistry};
use crate::schedulers;

/// External systems the server talks to.
pub struct Collaborators {
    pub index: Arc<dyn SearchIndex>,
    pub model: Arc<dyn LanguageModel>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub authenticator: Arc<dyn Authenticator>,
    pub quota: Arc<dyn QuotaGate>,
    pub events: EventBus,
}

impl Collaborators {
    /// Gateway auth and no quota; index, model and fetcher must be supplied.
    pub fn new(
        index: Arc<dyn SearchIndex>,
        model: Arc<dyn LanguageModel>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            index,
            model,
            fetcher,
            authenticator: Arc::new(GatewayAuthenticator),
            quota: Arc::new(UnlimitedQuota),
            events: EventBus::new(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    registry: RoomRegistry,
    authenticator: Arc<dyn Authenticator>,
    quota: Arc<dyn QuotaGate>,
}

impl AppState {
    pub fn new(config: ServerConfig, collaborators: Collaborators) -> Self {
        let assistant = Arc::new(AssistantPipeline::new(
            Arc::clone(&collaborators.index),
            collaborators.model,
            collaborators.fetcher,
            AssistantSettings {
                identity: config.assistant_name.clone(),
                internal_host: config.internal_host.clone(),
            },
        ));
        let registry = RoomRegistry::new(RegistryDeps {
            index: collaborators.index,
            assistant,
            history: HistoryStore::new(config.data_dir.clone()),
            events: collaborators.events,
            timings: config.timings.clone(),
        });

        Self {
            inner: Arc::new(AppStateInner {
                config,
                registry,
                authenticator: collaborators.authenticator,
                quota: collaborators.quota,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.inner.registry
    }

    pub fn assistant(&self) -> &Arc<AssistantPipeline> {
        self.inner.registry.assistant()
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.inner.authenticator.as_ref()
    }

    pub fn quota(&self) -> &dyn QuotaGate {
        self.inner.quota.as_ref()
    }

    /// Start the reaper and the index event listener.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            schedulers::spawn_reaper(self.inner.registry.clone()),
            self.inner.registry.spawn_event_listener(),
        ]
    }
}
