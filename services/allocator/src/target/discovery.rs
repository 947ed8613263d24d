//! From service-discovery output to allocator input.
//!
//! The [`Discoverer`] receives full per-job target-group snapshots, turns
//! them into [`TargetItem`]s, runs them through the filter hook and hands
//! the result to the [`Allocator`]. Discovery can be chatty, so reloads are
//! debounced: an update fills a single pending-trigger slot and a ticker
//! decides when the pending reload actually runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ta_labels::names;
use ta_reconcile::{ConfigHash, ReconcileError};
use ta_relabel::RelabelConfig;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::{ItemHash, ScrapeConfig, TargetGroup, TargetItem};
use crate::allocation::Allocator;
use crate::metrics::Metrics;
use crate::prehook::Hook;

/// Discovery output: job name to that job's full list of target groups.
pub type TargetSets = HashMap<String, Vec<TargetGroup>>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to hash scrape configs: {0}")]
    Hash(#[from] ReconcileError),

    #[error("scrape config update rejected: {0}")]
    Update(String),
}

/// Where a batch of scrape configs came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventSource {
    ConfigFile,
    PrometheusCr,
}

/// Receives the merged scrape configs whenever they actually change.
pub trait ScrapeConfigsUpdater: Send + Sync {
    fn update_scrape_configs(
        &self,
        configs: &BTreeMap<String, ScrapeConfig>,
    ) -> Result<(), DiscoveryError>;
}

#[derive(Debug, Clone)]
pub struct DiscovererConfig {
    /// Minimum time between two reloads.
    pub reload_interval: Duration,
    /// Jobs processed concurrently during a reload.
    pub max_concurrent_jobs: usize,
}

impl Default for DiscovererConfig {
    fn default() -> Self {
        Self {
            reload_interval: Duration::from_secs(5),
            max_concurrent_jobs: 16,
        }
    }
}

#[derive(Default)]
struct ConfigState {
    by_source: BTreeMap<EventSource, Vec<ScrapeConfig>>,
    last_hash: Option<ConfigHash>,
}

pub struct Discoverer {
    allocator: Arc<Allocator>,
    metrics: Arc<Metrics>,
    config: DiscovererConfig,
    hook: Option<Arc<dyn Hook>>,
    updater: Option<Arc<dyn ScrapeConfigsUpdater>>,
    target_sets: Mutex<HashMap<String, Arc<Vec<TargetGroup>>>>,
    scrape_configs: Mutex<ConfigState>,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
    closed: AtomicBool,
}

impl Discoverer {
    pub fn new(allocator: Arc<Allocator>, config: DiscovererConfig) -> Self {
        // One pending reload at most; further triggers coalesce into it.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        Self {
            metrics: Arc::clone(allocator.metrics()),
            allocator,
            config,
            hook: None,
            updater: None,
            target_sets: Mutex::new(HashMap::new()),
            scrape_configs: Mutex::new(ConfigState::default()),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_updater(mut self, updater: Arc<dyn ScrapeConfigsUpdater>) -> Self {
        self.updater = Some(updater);
        self
    }

    /// Install the scrape configs from one source.
    ///
    /// Configs from all sources are merged by job name, later sources
    /// winning. The updater only hears about the merged set when its hash
    /// changed; the first call always goes through.
    pub fn apply_config(
        &self,
        source: EventSource,
        scrape_configs: Vec<ScrapeConfig>,
    ) -> Result<(), DiscoveryError> {
        let mut state = self.scrape_configs.lock();
        state.by_source.insert(source, scrape_configs);

        let mut jobs: BTreeMap<String, ScrapeConfig> = BTreeMap::new();
        for configs in state.by_source.values() {
            for cfg in configs {
                jobs.insert(cfg.job_name.clone(), cfg.clone());
            }
        }

        let hash = ConfigHash::of(&jobs)?;
        if let Some(updater) = &self.updater {
            if state.last_hash.as_ref() != Some(&hash) {
                updater.update_scrape_configs(&jobs)?;
                info!(jobs = jobs.len(), hash = %hash, "Scrape configs updated");
                state.last_hash = Some(hash);
            }
        }

        if let Some(hook) = &self.hook {
            let relabel: HashMap<String, Vec<RelabelConfig>> = jobs
                .iter()
                .map(|(job, cfg)| (job.clone(), cfg.relabel_configs.clone()))
                .collect();
            hook.set_config(relabel);
        }

        Ok(())
    }

    /// Replace the stored target groups.
    pub fn update_tsets(&self, tsets: TargetSets) {
        let tsets = tsets
            .into_iter()
            .map(|(job, groups)| (job, Arc::new(groups)))
            .collect();
        *self.target_sets.lock() = tsets;
    }

    /// Ask for a reload; a no-op when one is already pending.
    pub fn trigger_reload(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Stop starting new reloads. A reload in flight runs to completion.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Rebuild every target from the stored groups and push them to the
    /// allocator. Returns the number of targets pushed.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        let started = Instant::now();

        let target_sets: Vec<(String, Arc<Vec<TargetGroup>>)> = self
            .target_sets
            .lock()
            .iter()
            .map(|(job, groups)| (job.clone(), Arc::clone(groups)))
            .collect();
        self.metrics
            .retain_jobs(target_sets.iter().map(|(job, _)| job.as_str()));

        let capacity = target_sets
            .iter()
            .flat_map(|(_, groups)| groups.iter())
            .map(|group| group.targets.len())
            .sum();
        let merged = Arc::new(Mutex::new(HashMap::with_capacity(capacity)));
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1)));
        let mut tasks = JoinSet::new();

        for (job, groups) in target_sets {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let merged = Arc::clone(&merged);
            let metrics = Arc::clone(&self.metrics);
            tasks.spawn(async move {
                let _permit = permit;
                let items = process_target_groups(&job, &groups);
                metrics.set_targets_discovered(&job, items.len());
                merged.lock().extend(items);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Target group processing task failed");
            }
        }

        let targets = std::mem::take(&mut *merged.lock());
        let targets = match &self.hook {
            Some(hook) => hook.apply(targets),
            None => targets,
        };
        let count = targets.len();
        self.metrics.set_targets_kept(count);

        let stats = self.allocator.set_targets(targets);
        self.metrics.observe_latency(
            "process_targets",
            self.allocator.strategy_name(),
            started.elapsed(),
        );
        debug!(
            targets = count,
            added = stats.targets_added,
            removed = stats.targets_removed,
            "Reload complete"
        );
        count
    }

    /// Receive target-set updates until shutdown, reloading in the background.
    #[instrument(skip_all)]
    pub async fn run(
        self: Arc<Self>,
        mut tsets: mpsc::Receiver<TargetSets>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            reload_interval_ms = self.config.reload_interval.as_millis() as u64,
            "Starting target discoverer"
        );
        // Raised when discovery ends on its own, so the reloader can flush a
        // pending reload before exiting.
        let (drain_tx, drain_rx) = watch::channel(false);
        let reloader = tokio::spawn(Arc::clone(&self).reloader(shutdown.clone(), drain_rx));

        loop {
            tokio::select! {
                update = tsets.recv() => match update {
                    Some(update) => {
                        debug!(jobs = update.len(), "Service discovery update received");
                        self.update_tsets(update);
                        self.trigger_reload();
                    }
                    None => {
                        info!("Service discovery channel closed");
                        let _ = drain_tx.send(true);
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Either way an in-flight reload runs to completion.
        if let Err(e) = reloader.await {
            warn!(error = %e, "Reloader task failed");
        }
        self.close();
        info!("Target discoverer stopped");
    }

    async fn reloader(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        mut drain: watch::Receiver<bool>,
    ) {
        let Some(mut trigger) = self.trigger_rx.lock().take() else {
            warn!("Reloader already running");
            return;
        };

        let mut ticker = tokio::time::interval(self.config.reload_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Don't immediately tick on startup - wait for first interval
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = drain.changed() => {
                    self.flush(&mut trigger).await;
                    return;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
            }

            tokio::select! {
                signal = trigger.recv() => {
                    if signal.is_none() || self.is_closed() {
                        return;
                    }
                    self.reload().await;
                }
                _ = drain.changed() => {
                    self.flush(&mut trigger).await;
                    return;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Run the pending reload, if any, without waiting for the next tick.
    async fn flush(&self, trigger: &mut mpsc::Receiver<()>) {
        if trigger.try_recv().is_ok() && !self.is_closed() {
            debug!("Flushing pending reload");
            self.reload().await;
        }
    }
}

/// Canonicalize one job's groups: group labels overlaid with each target's
/// own labels, keyed by target hash.
pub fn process_target_groups(job: &str, groups: &[TargetGroup]) -> HashMap<ItemHash, TargetItem> {
    let mut items = HashMap::new();
    for group in groups {
        for target in &group.targets {
            let labels = group.labels.merge(target);
            let url = labels.get(names::ADDRESS).unwrap_or_default().to_string();
            let item = TargetItem::new(job, url, labels);
            items.insert(item.hash(), item);
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use ta_labels::labels;
    use ta_relabel::{Action, Regexp};

    use super::*;
    use crate::allocation::{Collector, LeastWeightedStrategy};
    use crate::prehook::RelabelConfigTargetFilter;
    use crate::target::StaticConfig;

    #[derive(Default)]
    struct CountingUpdater {
        calls: AtomicUsize,
    }

    impl ScrapeConfigsUpdater for CountingUpdater {
        fn update_scrape_configs(
            &self,
            _configs: &BTreeMap<String, ScrapeConfig>,
        ) -> Result<(), DiscoveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn allocator() -> Arc<Allocator> {
        let allocator = Allocator::new(Box::new(LeastWeightedStrategy));
        allocator.set_collectors(HashMap::from([(
            "collector-0".to_string(),
            Collector::new("collector-0"),
        )]));
        Arc::new(allocator)
    }

    fn static_job(job: &str, targets: &[&str]) -> ScrapeConfig {
        let mut cfg = ScrapeConfig::new(job);
        cfg.static_configs.push(StaticConfig {
            targets: targets.iter().map(|t| t.to_string()).collect(),
            labels: labels! { "env" => "test" },
        });
        cfg
    }

    #[test]
    fn test_process_target_groups_overlays_labels() {
        let group = TargetGroup {
            source: "job/0".into(),
            labels: labels! { "env" => "prod", "team" => "a" },
            targets: vec![labels! { names::ADDRESS => "10.0.0.1:9100", "env" => "dev" }],
        };

        let items = process_target_groups("node", &[group]);
        assert_eq!(items.len(), 1);
        let item = items.values().next().unwrap();
        assert_eq!(item.target_url(), "10.0.0.1:9100");
        assert_eq!(item.labels().get("env"), Some("dev"));
        assert_eq!(item.labels().get("team"), Some("a"));
    }

    #[test]
    fn test_apply_config_updates_only_on_change() {
        let updater = Arc::new(CountingUpdater::default());
        let discoverer = Discoverer::new(allocator(), DiscovererConfig::default())
            .with_updater(updater.clone());

        let configs = vec![static_job("node", &["a:1"])];
        discoverer
            .apply_config(EventSource::ConfigFile, configs.clone())
            .unwrap();
        discoverer
            .apply_config(EventSource::ConfigFile, configs)
            .unwrap();
        assert_eq!(updater.calls.load(Ordering::SeqCst), 1);

        discoverer
            .apply_config(EventSource::PrometheusCr, vec![static_job("app", &["b:1"])])
            .unwrap();
        assert_eq!(updater.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_apply_config_later_source_wins() {
        let hook = Arc::new(RelabelConfigTargetFilter::new());
        let discoverer =
            Discoverer::new(allocator(), DiscovererConfig::default()).with_hook(hook.clone());

        let mut from_file = static_job("node", &["a:1"]);
        from_file.relabel_configs.push(RelabelConfig {
            action: Action::Drop,
            source_labels: vec!["env".into()],
            regex: Regexp::new("test").unwrap(),
            ..Default::default()
        });
        discoverer
            .apply_config(EventSource::ConfigFile, vec![from_file])
            .unwrap();
        assert_eq!(hook.config()["node"].len(), 1);

        discoverer
            .apply_config(EventSource::PrometheusCr, vec![static_job("node", &["a:1"])])
            .unwrap();
        assert!(hook.config()["node"].is_empty());
    }

    #[tokio::test]
    async fn test_reload_applies_hook_and_allocates() {
        let allocator = allocator();
        let hook = Arc::new(RelabelConfigTargetFilter::new());
        let discoverer = Discoverer::new(Arc::clone(&allocator), DiscovererConfig::default())
            .with_hook(hook);

        let mut dropped = static_job("dropped", &["c:1"]);
        dropped.relabel_configs.push(RelabelConfig {
            action: Action::Drop,
            source_labels: vec!["env".into()],
            regex: Regexp::new("test").unwrap(),
            ..Default::default()
        });
        let kept = static_job("kept", &["a:1", "b:1"]);
        let tsets: TargetSets = [&kept, &dropped]
            .iter()
            .map(|cfg| (cfg.job_name.clone(), cfg.static_target_groups()))
            .collect();
        discoverer
            .apply_config(EventSource::ConfigFile, vec![kept, dropped])
            .unwrap();

        discoverer.update_tsets(tsets);
        assert_eq!(discoverer.reload().await, 2);

        let items = allocator.target_items();
        assert_eq!(items.len(), 2);
        assert!(items
            .values()
            .all(|item| item.job_name() == "kept" && item.collector_name() == Some("collector-0")));

        let snapshot = allocator.metrics().snapshot();
        assert_eq!(snapshot.targets_discovered.get("dropped"), Some(&1));
        assert_eq!(snapshot.targets_kept, 2);
    }

    #[tokio::test]
    async fn test_reload_after_close_is_noop() {
        let allocator = allocator();
        let discoverer = Discoverer::new(Arc::clone(&allocator), DiscovererConfig::default());
        discoverer.update_tsets(TargetSets::from([(
            "node".to_string(),
            static_job("node", &["a:1"]).static_target_groups(),
        )]));

        discoverer.close();
        assert_eq!(discoverer.reload().await, 0);
        assert!(allocator.target_items().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_flushes_pending_reload_when_discovery_ends() {
        let allocator = allocator();
        let discoverer = Arc::new(Discoverer::new(
            Arc::clone(&allocator),
            DiscovererConfig::default(),
        ));
        let (tsets_tx, tsets_rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&discoverer).run(tsets_rx, shutdown_rx));

        let cfg = static_job("node", &["a:1", "b:1"]);
        tsets_tx
            .send(TargetSets::from([("node".to_string(), cfg.static_target_groups())]))
            .await
            .unwrap();
        drop(tsets_tx);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(allocator.target_items().len(), 2);
        assert!(handle.is_finished());
        handle.await.unwrap();

        // Closed for good: nothing reloads anymore.
        assert_eq!(discoverer.reload().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_debounces_updates() {
        let allocator = allocator();
        let discoverer = Arc::new(Discoverer::new(
            Arc::clone(&allocator),
            DiscovererConfig {
                reload_interval: Duration::from_secs(5),
                max_concurrent_jobs: 2,
            },
        ));
        let (tsets_tx, tsets_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&discoverer).run(tsets_rx, shutdown_rx));

        for targets in [vec!["a:1"], vec!["a:1", "b:1"], vec!["a:1", "b:1", "c:1"]] {
            let cfg = static_job("node", &targets);
            tsets_tx
                .send(TargetSets::from([("node".to_string(), cfg.static_target_groups())]))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(allocator.target_items().is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(allocator.target_items().len(), 3);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
