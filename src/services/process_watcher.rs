use crate::error::{AhkError, Result};
use crate::sync::{AsyncSignal, WaitOutcome};
use crate::utils::proc_fs::{self, ProcessState};
use crate::{ahk_error, debug_if_enabled};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A process being watched for exit. Shared by everyone who asked for the same pid.
pub struct WatchedProcess {
    pid: u32,
    name: Option<String>,
    exited: AsyncSignal,
    stop: CancellationToken,
}

impl WatchedProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Advisory; see [`AsyncSignal::is_set`].
    pub fn has_exited(&self) -> bool {
        self.exited.is_set()
    }

    pub fn exit_signal(&self) -> &AsyncSignal {
        &self.exited
    }

    pub async fn wait_for_exit(&self, timeout: Option<Duration>, cancel: Option<&CancellationToken>) -> WaitOutcome {
        self.exited.wait_async(timeout, cancel).await
    }

    /// Blocking variant, for callers outside of async code.
    pub fn wait_for_exit_blocking(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<WaitOutcome> {
        self.exited.wait(timeout, cancel)
    }
}

impl fmt::Debug for WatchedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchedProcess")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("exited", &self.exited.is_set())
            .finish()
    }
}

/// Registry of watched processes. Each pid gets one poller that sets the
/// process's exit signal once procfs reports it gone or zombie.
///
/// An entry lives as long as its process: the poller removes it after the
/// exit, so a reused pid never hands out an already-set signal.
pub struct ProcessWatcher {
    poll_interval: Duration,
    watched: Arc<DashMap<u32, Arc<WatchedProcess>>>,
}

impl ProcessWatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            watched: Arc::new(DashMap::new()),
        }
    }

    /// Starts watching `pid`, or returns the existing entry for it.
    /// Needs a running tokio runtime for the poller.
    pub fn watch(&self, pid: u32) -> Result<Arc<WatchedProcess>> {
        match self.watched.entry(pid) {
            Entry::Occupied(mut entry) => {
                if !entry.get().has_exited() {
                    return Ok(Arc::clone(entry.get()));
                }
                // Опросчик ещё не успел убрать запись завершившегося процесса
                match proc_fs::process_state(pid) {
                    ProcessState::Zombie => Ok(Arc::clone(entry.get())),
                    ProcessState::Gone => {
                        entry.remove();
                        AhkError::process_not_found(pid)
                    }
                    ProcessState::Running => {
                        debug_if_enabled!("PID {} переиспользован, начинаем наблюдение заново", pid);
                        let process = self.start(pid)?;
                        entry.insert(Arc::clone(&process));
                        Ok(process)
                    }
                }
            }
            Entry::Vacant(entry) => {
                if proc_fs::process_state(pid) == ProcessState::Gone {
                    return AhkError::process_not_found(pid);
                }
                let process = self.start(pid)?;
                entry.insert(Arc::clone(&process));
                Ok(process)
            }
        }
    }

    fn start(&self, pid: u32) -> Result<Arc<WatchedProcess>> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            ahk_error!(service_unavailable, "наблюдение за процессом требует tokio runtime: {}", e)
        })?;

        let process = Arc::new(WatchedProcess {
            pid,
            name: proc_fs::process_name(pid),
            exited: AsyncSignal::new(false),
            stop: CancellationToken::new(),
        });
        info!(
            "Наблюдаем за процессом {} ({})",
            pid,
            process.name().unwrap_or("?")
        );

        handle.spawn(poll_until_exit(
            Arc::clone(&process),
            Arc::clone(&self.watched),
            self.poll_interval,
        ));
        Ok(process)
    }

    /// Already-watched entry for `pid`, without starting a new watch.
    pub fn get(&self, pid: u32) -> Option<Arc<WatchedProcess>> {
        self.watched.get(&pid).map(|entry| Arc::clone(entry.value()))
    }

    /// Stops watching `pid`. Waiters of the entry are left waiting for their own
    /// timeout or cancellation.
    pub fn forget(&self, pid: u32) -> bool {
        match self.watched.remove(&pid) {
            Some((_, process)) => {
                process.stop.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.watched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }
}

impl Drop for ProcessWatcher {
    fn drop(&mut self) {
        for entry in self.watched.iter() {
            entry.value().stop.cancel();
        }
    }
}

async fn poll_until_exit(
    process: Arc<WatchedProcess>,
    registry: Arc<DashMap<u32, Arc<WatchedProcess>>>,
    poll_interval: Duration,
) {
    loop {
        if proc_fs::process_state(process.pid).has_exited() {
            info!("Процесс {} завершился", process.pid);
            process.exited.set();
            // Запись могла быть уже заменена новой для переиспользованного pid
            registry.remove_if(&process.pid, |_, current| Arc::ptr_eq(current, &process));
            return;
        }

        tokio::select! {
            _ = process.stop.cancelled() => {
                debug_if_enabled!("Наблюдение за процессом {} остановлено", process.pid);
                return;
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}
