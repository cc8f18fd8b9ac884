//! Merged, cached view of every configured source.
//!
//! The current [`Snapshot`] sits behind an [`ArcSwap`]: readers load it
//! lock-free, and a refresh builds a complete replacement before publishing it
//! with a single store, so no reader ever sees a half-merged mapping.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{OnSourceFailure, RegistryConfig};
use crate::model::Resource;
use crate::source::{FetchError, SourceClient};
use crate::util::now_ms;

/// One immutable, internally consistent view of all known resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    resources: BTreeMap<String, Resource>,
    refreshed_at_ms: Option<i64>,
}

impl Snapshot {
    /// Builds a snapshot; on duplicate names the later resource wins.
    pub fn from_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        let resources = resources
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();
        Self {
            resources,
            refreshed_at_ms: Some(now_ms()),
        }
    }

    /// Looks up `name`, falling back to an `Unknown` resource.
    pub fn resource(&self, name: &str) -> Resource {
        self.resources
            .get(name)
            .cloned()
            .unwrap_or_else(|| Resource::unknown(name))
    }

    /// Looks up every requested name; duplicates collapse into one key.
    pub fn resources_for<I, S>(&self, names: I) -> BTreeMap<String, Resource>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|n| {
                let name = n.as_ref();
                (name.to_string(), self.resource(name))
            })
            .collect()
    }

    /// Sorted, deduplicated names.
    pub fn names(&self) -> Vec<String> {
        self.resources.keys().cloned().collect()
    }

    /// Resources in name order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// True before any resource is known.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Wall-clock time of publication; `None` until the first refresh.
    pub fn refreshed_at_ms(&self) -> Option<i64> {
        self.refreshed_at_ms
    }
}

/// Outcome counters of one refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Sources fetched successfully.
    pub sources_ok: usize,
    /// Sources that failed this cycle.
    pub sources_failed: usize,
    /// Resources in the published snapshot.
    pub resources: usize,
}

/// Process-lifetime resource cache shared by every gate invocation.
pub struct ResourceRegistry {
    sources: Vec<SourceClient>,
    snapshot: ArcSwap<Snapshot>,
    /// Last successful fetch per source, indexed like `sources`.
    /// The lock also serializes refreshes.
    last_known: Mutex<Vec<Option<Vec<Resource>>>>,
    on_source_failure: OnSourceFailure,
    refresh_interval: Duration,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::with_clients(vec![], &RegistryConfig::default())
    }
}

impl ResourceRegistry {
    /// Creates a registry with an empty snapshot; call [`refresh`](Self::refresh)
    /// or [`spawn_refresher`](Self::spawn_refresher) to populate it.
    pub fn new(config: RegistryConfig) -> Result<Self, FetchError> {
        let sources = config
            .sources
            .iter()
            .cloned()
            .map(SourceClient::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_clients(sources, &config))
    }

    fn with_clients(sources: Vec<SourceClient>, config: &RegistryConfig) -> Self {
        let last_known = vec![None; sources.len()];
        Self {
            sources,
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            last_known: Mutex::new(last_known),
            on_source_failure: config.on_source_failure,
            refresh_interval: config.refresh_interval(),
        }
    }

    /// Number of configured sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Background refresh cadence.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Fetches every source concurrently and publishes the merged snapshot.
    ///
    /// A failing source never aborts the refresh. Its previous resources are
    /// kept or marked `Unknown` according to [`OnSourceFailure`]. On name
    /// collisions the later source in configuration order wins.
    pub async fn refresh(&self) -> RefreshSummary {
        let mut last_known = self.last_known.lock().await;

        let mut set = JoinSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let source = source.clone();
            set.spawn(async move { (idx, source.fetch_snapshot().await) });
        }

        let mut results: Vec<Option<Result<Vec<Resource>, FetchError>>> =
            self.sources.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(e) => warn!(error = %e, "source fetch task failed"),
            }
        }

        let mut summary = RefreshSummary::default();
        let mut merged: BTreeMap<String, Resource> = BTreeMap::new();

        for (idx, result) in results.into_iter().enumerate() {
            let source = self.sources[idx].base_url();
            match result {
                Some(Ok(resources)) => {
                    summary.sources_ok += 1;
                    for r in &resources {
                        merged.insert(r.name.clone(), r.clone());
                    }
                    last_known[idx] = Some(resources);
                }
                failed => {
                    summary.sources_failed += 1;
                    if let Some(Err(e)) = &failed {
                        warn!(source, error = %e, "source fetch failed");
                    }
                    let Some(previous) = &last_known[idx] else {
                        continue;
                    };
                    for r in previous {
                        let r = match self.on_source_failure {
                            OnSourceFailure::KeepStale => r.clone(),
                            OnSourceFailure::MarkUnknown => Resource::unknown(r.name.clone()),
                        };
                        merged.insert(r.name.clone(), r);
                    }
                }
            }
        }

        summary.resources = merged.len();
        self.snapshot.store(Arc::new(Snapshot {
            resources: merged,
            refreshed_at_ms: Some(now_ms()),
        }));

        debug!(
            sources_ok = summary.sources_ok,
            sources_failed = summary.sources_failed,
            resources = summary.resources,
            "registry refreshed"
        );
        summary
    }

    /// Replaces the snapshot directly, bypassing sources and timer.
    ///
    /// Used to inject deterministic state (tests, offline tooling).
    pub fn set_resources(&self, resources: impl IntoIterator<Item = Resource>) {
        self.snapshot
            .store(Arc::new(Snapshot::from_resources(resources)));
    }

    /// Current snapshot. Hold on to it for several consistent lookups.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Current resource for `name`, `Unknown` if no source reports it.
    pub fn get_resource(&self, name: &str) -> Resource {
        self.snapshot.load().resource(name)
    }

    /// All values come from the same snapshot.
    pub fn get_resources<I, S>(&self, names: I) -> BTreeMap<String, Resource>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.snapshot.load().resources_for(names)
    }

    /// Sorted names in the current snapshot.
    pub fn resource_names(&self) -> Vec<String> {
        self.snapshot.load().names()
    }

    /// Starts the periodic refresh task. The first refresh runs immediately.
    pub fn spawn_refresher(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = interval(registry.refresh_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                sources = registry.source_count(),
                interval_secs = registry.refresh_interval.as_secs(),
                "resource refresher started"
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        registry.refresh().await;
                    }
                }
            }
            info!("resource refresher stopped");
        })
    }
}
