//! Async-compatible manual-reset signal.
//!
//! Every epoch of the signal is a *generation*: a watch channel whose value flips
//! from `false` to `true` exactly once. Waiters subscribe to the generation that is
//! current when they start waiting, so a later `reset()` can never take a wakeup
//! back from them. `reset()` only mints a new generation if the current one is set.

use crate::ahk_error;
use crate::debug_if_enabled;
use crate::error::Result;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::future::pending;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Результат ожидания сигнала
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitOutcome {
    /// Сигнал установлен
    Completed,
    /// Раньше истёк таймаут
    TimedOut,
    /// Раньше сработал токен отмены
    Cancelled,
}

impl WaitOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, WaitOutcome::Completed)
    }
}

impl fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitOutcome::Completed => write!(f, "completed"),
            WaitOutcome::TimedOut => write!(f, "timed out"),
            WaitOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

struct Generation {
    id: u64,
    gate: watch::Sender<bool>,
}

impl Generation {
    fn new(id: u64, set: bool) -> Self {
        let (gate, _) = watch::channel(set);
        Self { id, gate }
    }

    fn is_set(&self) -> bool {
        *self.gate.borrow()
    }
}

/// Устанавливаемый и сбрасываемый сигнал, который могут ждать любые задачи и потоки
pub struct AsyncSignal {
    current: Mutex<Generation>,
}

impl Default for AsyncSignal {
    fn default() -> Self {
        Self::new(false)
    }
}

impl AsyncSignal {
    pub fn new(initially_set: bool) -> Self {
        Self {
            current: Mutex::new(Generation::new(0, initially_set)),
        }
    }

    /// Справочный снимок состояния. Ответ может устареть к моменту, когда его прочтут.
    pub fn is_set(&self) -> bool {
        self.current.lock().is_set()
    }

    /// Номер текущего поколения. Меняется, только когда `reset()` действительно сбрасывает.
    pub fn generation(&self) -> u64 {
        self.current.lock().id
    }

    /// Устанавливает сигнал и отпускает всех ожидающих текущего поколения.
    /// Для уже установленного сигнала ничего не делает.
    pub fn set(&self) {
        let current = self.current.lock();
        let changed = current.gate.send_if_modified(|set| !std::mem::replace(set, true));
        if changed {
            debug_if_enabled!("Сигнал установлен (поколение {})", current.id);
        }
    }

    /// Сбрасывает сигнал, начиная новое поколение. Кто захватил предыдущее
    /// поколение, продолжает видеть его установленным. Для сброшенного сигнала ничего не делает.
    pub fn reset(&self) {
        let mut current = self.current.lock();
        if current.is_set() {
            let next = current.id.wrapping_add(1);
            *current = Generation::new(next, false);
            debug_if_enabled!("Сигнал сброшен, новое поколение {}", next);
        }
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.current.lock().gate.subscribe()
    }

    /// Ожидание установки без таймаута и отмены
    pub async fn wait_set(&self) {
        self.wait_async(None, None).await;
    }

    /// Ждёт, пока сигнал установят, истечёт таймаут или сработает `cancel`,
    /// смотря что раньше. Таймаут и отмена сам сигнал не трогают.
    ///
    /// Если сигнал уже установлен, результат `Completed` даже при заранее
    /// отменённом токене.
    pub async fn wait_async(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> WaitOutcome {
        // Подписка идёт под блокировкой: параллельный set() либо успевает раньше
        // (получатель сразу видит `true`), либо позже (получателя уведомят)
        let mut rx = self.subscribe();

        let released = async move {
            let closed = rx.wait_for(|set| *set).await.is_err();
            if closed {
                // Отправитель исчезает только вместе с сигналом
                pending::<()>().await;
            }
        };
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => pending::<()>().await,
            }
        };
        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = released => WaitOutcome::Completed,
            _ = cancelled => WaitOutcome::Cancelled,
            _ = deadline => WaitOutcome::TimedOut,
        }
    }

    /// Блокирующий вариант [`wait_async`](Self::wait_async).
    ///
    /// Вне tokio ожидание крутится на общем однопоточном runtime. Внутри
    /// многопоточного runtime поток отдаётся через `block_in_place`. Однопоточный
    /// runtime заблокировать без взаимоблокировки нельзя, там возвращается ошибка.
    pub fn wait(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<WaitOutcome> {
        match Handle::try_current() {
            Ok(handle) => match handle.runtime_flavor() {
                RuntimeFlavor::MultiThread => Ok(tokio::task::block_in_place(|| {
                    handle.block_on(self.wait_async(timeout, cancel))
                })),
                flavor => Err(ahk_error!(
                    invalid_operation,
                    "блокирующее ожидание сигнала внутри runtime {:?}",
                    flavor
                )),
            },
            Err(_) => Ok(blocking_runtime()?.block_on(self.wait_async(timeout, cancel))),
        }
    }
}

impl fmt::Debug for AsyncSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.lock();
        f.debug_struct("AsyncSignal")
            .field("generation", &current.id)
            .field("is_set", &current.is_set())
            .finish()
    }
}

/// Однопоточный runtime для блокирующих ожиданий вне tokio.
/// `block_on` на нём можно звать из нескольких потоков одновременно.
fn blocking_runtime() -> Result<&'static Runtime> {
    static RUNTIME: OnceCell<Runtime> = OnceCell::new();
    let runtime = RUNTIME.get_or_try_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .thread_name("ahk-signal-wait")
            .build()
    })?;
    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn set_is_idempotent() {
        let signal = AsyncSignal::new(false);
        signal.set();
        let generation = signal.generation();
        signal.set();

        assert!(signal.is_set());
        assert_eq!(signal.generation(), generation);
    }

    #[test]
    fn reset_on_unset_signal_keeps_generation() {
        let signal = AsyncSignal::default();
        signal.reset();
        assert_eq!(signal.generation(), 0);
        assert!(!signal.is_set());

        signal.set();
        signal.reset();
        assert_eq!(signal.generation(), 1);
        assert!(!signal.is_set());
    }

    #[tokio::test]
    async fn initially_set_completes_immediately() {
        let signal = AsyncSignal::new(true);
        let outcome = signal
            .wait_async(Some(Duration::from_millis(10)), None)
            .await;
        assert_eq!(outcome, WaitOutcome::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn set_releases_all_waiters() {
        let signal = Arc::new(AsyncSignal::new(false));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let signal = Arc::clone(&signal);
            handles.push(tokio::spawn(async move { signal.wait_async(None, None).await }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.set();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), WaitOutcome::Completed);
        }
    }

    #[tokio::test]
    async fn wait_after_reset_blocks_until_next_set() {
        let signal = Arc::new(AsyncSignal::new(false));
        signal.set();
        signal.reset();

        let outcome = signal
            .wait_async(Some(Duration::from_millis(30)), None)
            .await;
        assert_eq!(outcome, WaitOutcome::TimedOut);

        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait_async(Some(Duration::from_secs(5)), None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.set();
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Completed);
    }

    #[test]
    fn released_waiter_is_not_unwoken_by_reset() {
        let signal = AsyncSignal::new(false);
        let mut rx = signal.subscribe();
        signal.set();
        signal.reset();

        // Старое поколение остаётся установленным для тех, кто его захватил
        assert!(*rx.borrow_and_update());
        assert!(!signal.is_set());
    }

    #[tokio::test]
    async fn timeout_on_never_set_signal() {
        let signal = AsyncSignal::new(false);
        let started = Instant::now();
        let outcome = signal
            .wait_async(Some(Duration::from_millis(50)), None)
            .await;

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(!signal.is_set());
    }

    #[tokio::test]
    async fn cancellation_is_distinct_from_timeout() {
        let signal = AsyncSignal::new(false);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = signal
            .wait_async(Some(Duration::from_secs(5)), Some(&token))
            .await;
        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(!signal.is_set());
    }

    #[tokio::test]
    async fn set_wins_over_precancelled_token() {
        let signal = AsyncSignal::new(true);
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(signal.wait_async(None, Some(&token)).await, WaitOutcome::Completed);

        signal.reset();
        assert_eq!(signal.wait_async(None, Some(&token)).await, WaitOutcome::Cancelled);
    }

    #[test]
    fn blocking_wait_outside_runtime() {
        let signal = Arc::new(AsyncSignal::new(false));
        let setter = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                signal.set();
            })
        };

        let outcome = signal.wait(Some(Duration::from_secs(5)), None).unwrap();
        setter.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Completed);

        signal.reset();
        let outcome = signal.wait(Some(Duration::from_millis(20)), None).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn concurrent_blocking_waiters() {
        let signal = Arc::new(AsyncSignal::new(false));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = Arc::clone(&signal);
                std::thread::spawn(move || signal.wait(Some(Duration::from_secs(5)), None).unwrap())
            })
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        signal.set();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), WaitOutcome::Completed);
        }
    }

    #[test]
    fn blocking_wait_is_cancellable() {
        let signal = AsyncSignal::new(false);
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                token.cancel();
            })
        };

        let started = Instant::now();
        let outcome = signal.wait(Some(Duration::from_secs(5)), Some(&token)).unwrap();
        canceller.join().unwrap();

        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!signal.is_set());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_wait_inside_multi_thread_runtime() {
        let signal = AsyncSignal::new(true);
        assert_eq!(signal.wait(None, None).unwrap(), WaitOutcome::Completed);
    }

    #[tokio::test]
    async fn blocking_wait_refused_on_current_thread_runtime() {
        let signal = AsyncSignal::new(true);
        let err = signal.wait(None, None).unwrap_err();
        assert!(matches!(err, crate::error::AhkError::InvalidOperation(_)));
    }
}
