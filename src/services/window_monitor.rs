use crate::cache::{RefreshPolicy, RefreshingCache};
use crate::debug_if_enabled;
use crate::error::{AhkError, Result};
use crate::events::WindowSnapshot;
use crate::services::window_source::WindowSource;
use crate::sync::{AsyncSignal, WaitOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Serves the active-window snapshot through a `RefreshingCache` and reports
/// focus changes. The source is only queried when the cache decides to refresh.
pub struct WindowMonitor {
    cache: RefreshingCache<WindowSnapshot>,
    source_name: &'static str,
    ready: AsyncSignal,
}

impl WindowMonitor {
    pub fn new(source: Arc<dyn WindowSource>, ttl: Duration, policy: RefreshPolicy) -> Result<Self> {
        let source_name = source.name();
        let producer = move || -> anyhow::Result<WindowSnapshot> {
            Ok(WindowSnapshot::of(source.active_window()?))
        };

        info!("WindowMonitor: источник {}, политика {}, TTL {:?}", source_name, policy, ttl);

        Ok(Self {
            cache: RefreshingCache::new(producer, ttl, policy)?,
            source_name,
            ready: AsyncSignal::new(false),
        })
    }

    pub fn source_name(&self) -> &'static str {
        self.source_name
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.cache.policy()
    }

    /// Current snapshot. A lazy cache may run the source on this thread.
    pub fn snapshot(&self) -> Result<WindowSnapshot> {
        let snapshot = self.cache.get()?;
        if !snapshot.is_empty() {
            self.ready.set();
        }
        Ok(snapshot)
    }

    /// Same as `snapshot()`, but keeps a lazy refresh off the async worker.
    pub async fn snapshot_async(self: Arc<Self>) -> Result<WindowSnapshot> {
        match self.cache.policy() {
            RefreshPolicy::Continuous => self.snapshot(),
            RefreshPolicy::Lazy => {
                tokio::task::spawn_blocking(move || self.snapshot())
                    .await
                    .map_err(|e| AhkError::Internal(format!("задача снимка окна прервана: {}", e)))?
            }
        }
    }

    /// Waits until the first non-empty snapshot has been observed.
    pub async fn wait_ready(&self, timeout: Option<Duration>, cancel: Option<&CancellationToken>) -> WaitOutcome {
        self.ready.wait_async(timeout, cancel).await
    }

    /// Polls the snapshot every `poll_interval` and logs focus changes until
    /// `cancel` fires. Returns the number of changes observed.
    pub async fn run(self: Arc<Self>, poll_interval: Duration, cancel: CancellationToken) -> Result<u64> {
        info!("WindowMonitor запущен (опрос каждые {:?})", poll_interval);

        let mut ticker = interval(poll_interval);
        let mut current = WindowSnapshot::default();
        let mut changes = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = match Arc::clone(&self).snapshot_async().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Не удалось получить активное окно: {}", e);
                    continue;
                }
            };

            if snapshot.changed_from(&current) {
                info!("Смена активного окна: {} -> {}", current, snapshot);
                current = snapshot;
                changes += 1;
            } else {
                debug_if_enabled!("Активное окно не изменилось: {}", current);
            }
        }

        self.cache.shutdown().await;
        info!("WindowMonitor остановлен, смен окна: {}", changes);
        Ok(changes)
    }
}
