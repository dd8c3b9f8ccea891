//! Process-wide audit pipeline.
//!
//! One [`AuditPipeline`] is started when the server starts and shut down
//! once when it stops. It owns the event bus, the multi-sink consumer task
//! and, when broadcast is configured, the forwarder and receiver tasks.

use std::sync::Arc;

use footprint_core::{
    ActivityRecord, BroadcastChannel, EventBus, MemoryEventBus, MemoryRecordStore,
    MultiSinkConsumer, PersistenceAttributionHook, RecordStore, SearchIndex, SinkConfig,
};
use footprint_core::config::DEFAULT_BUS_CAPACITY;
use footprint_iggy::IggyBroker;
use footprint_sinks::{HttpSearchIndex, TursoActivityStore};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::ServerError;

/// Collects the pipeline's collaborators before starting it.
pub struct AuditPipelineBuilder {
    bus_capacity: usize,
    sinks: SinkConfig,
    activity: Option<Arc<dyn RecordStore<ActivityRecord>>>,
    index: Option<(Arc<dyn SearchIndex>, String)>,
    broadcast: Option<BroadcastChannel>,
}

impl Default for AuditPipelineBuilder {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_BUS_CAPACITY,
            sinks: SinkConfig::default(),
            activity: None,
            index: None,
            broadcast: None,
        }
    }
}

impl AuditPipelineBuilder {
    #[must_use]
    pub fn bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    #[must_use]
    pub fn sinks(mut self, sinks: SinkConfig) -> Self {
        self.sinks = sinks;
        self
    }

    /// Primary store for activity records. Defaults to an in-memory store.
    #[must_use]
    pub fn activity_store(mut self, store: Arc<dyn RecordStore<ActivityRecord>>) -> Self {
        self.activity = Some(store);
        self
    }

    #[must_use]
    pub fn search_index(mut self, index: Arc<dyn SearchIndex>, prefix: impl Into<String>) -> Self {
        self.index = Some((index, prefix.into()));
        self
    }

    #[must_use]
    pub fn broadcast(mut self, channel: BroadcastChannel) -> Self {
        self.broadcast = Some(channel);
        self
    }

    /// Start the background tasks.
    ///
    /// Fails only if the broadcast receiver cannot subscribe.
    pub async fn start(self) -> Result<AuditPipeline, ServerError> {
        let bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::new(self.bus_capacity));
        let shutdown = CancellationToken::new();

        let activity = match self.activity {
            Some(store) => store,
            None => {
                let mut store = MemoryRecordStore::new();
                store.register_hook(Arc::new(PersistenceAttributionHook::new()));
                Arc::new(store) as Arc<dyn RecordStore<ActivityRecord>>
            }
        };

        let mut consumer = MultiSinkConsumer::new(Arc::clone(&activity), self.sinks);
        if let Some((index, prefix)) = self.index {
            consumer = consumer.with_index(index, prefix);
        }

        let mut tasks = vec![Arc::new(consumer).spawn(bus.as_ref(), shutdown.clone())];

        if let Some(channel) = &self.broadcast {
            tasks.push(channel.spawn_forwarder(bus.as_ref(), shutdown.clone()));
            match channel.spawn_receiver(Arc::clone(&bus), shutdown.clone()).await {
                Ok(handle) => tasks.push(handle),
                Err(e) => {
                    shutdown.cancel();
                    return Err(e.into());
                }
            }
            info!(
                channel = %channel.channel(),
                instance_id = %channel.instance_id(),
                "Broadcast enabled"
            );
        }

        info!(tasks = tasks.len(), "Audit pipeline started");

        Ok(AuditPipeline {
            bus,
            activity,
            broadcast: self.broadcast,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }
}

/// The running audit pipeline.
pub struct AuditPipeline {
    bus: Arc<dyn EventBus>,
    activity: Arc<dyn RecordStore<ActivityRecord>>,
    broadcast: Option<BroadcastChannel>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AuditPipeline {
    pub fn builder() -> AuditPipelineBuilder {
        AuditPipelineBuilder::default()
    }

    /// Build the configured collaborators and start the pipeline.
    ///
    /// Connection setup for the primary store and the broker happens here
    /// and is fatal; the search index is only reached once events flow.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self, ServerError> {
        if config.bus.capacity == 0 {
            return Err(ServerError::Config("bus.capacity must be at least 1".into()));
        }

        let mut store = match &config.store.path {
            Some(path) => {
                info!(path = %path.display(), "Opening activity store");
                TursoActivityStore::new_local(path).await?
            }
            None => {
                debug!("No store path configured, using in-memory activity store");
                TursoActivityStore::new_memory().await?
            }
        };
        store.register_hook(Arc::new(PersistenceAttributionHook::new()));

        let mut builder = Self::builder()
            .bus_capacity(config.bus.capacity)
            .sinks(config.sinks.clone())
            .activity_store(Arc::new(store));

        if let Some(index) = &config.index {
            info!(url = %index.url, prefix = %index.prefix, "Search index enabled");
            builder = builder.search_index(
                Arc::new(HttpSearchIndex::from_config(index)?),
                index.prefix.clone(),
            );
        }

        if let Some(broadcast) = &config.broadcast {
            let broker = IggyBroker::new(broadcast.broker.clone())?;
            broker.connect().await?;
            builder = builder.broadcast(BroadcastChannel::from_config(Arc::new(broker), broadcast));
        }

        builder.start().await
    }

    /// The process-wide event bus.
    pub fn bus(&self) -> Arc<dyn EventBus> {
        Arc::clone(&self.bus)
    }

    /// The primary activity store.
    pub fn activity(&self) -> Arc<dyn RecordStore<ActivityRecord>> {
        Arc::clone(&self.activity)
    }

    /// This instance's id on the broadcast channel, if broadcast is enabled.
    pub fn instance_id(&self) -> Option<&str> {
        self.broadcast.as_ref().map(BroadcastChannel::instance_id)
    }

    /// Token cancelled when the pipeline shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop all background tasks and wait for them to finish.
    ///
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Audit pipeline task ended abnormally");
            }
        }
        info!("Audit pipeline stopped");
    }
}
