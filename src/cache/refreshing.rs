use super::countdown::CountdownTimer;
use crate::debug_if_enabled;
use crate::error::{AhkError, Result};
use crate::{ahk_error, trace_if_enabled};
use anyhow::anyhow;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Когда обновлять закэшированное значение
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    /// Пересчёт при первом `get()` после истечения TTL
    #[default]
    Lazy,
    /// Фоновая задача пересчитывает значение каждые TTL, независимо от обращений
    Continuous,
}

impl fmt::Display for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshPolicy::Lazy => write!(f, "lazy"),
            RefreshPolicy::Continuous => write!(f, "continuous"),
        }
    }
}

type Producer<T> = Box<dyn Fn() -> anyhow::Result<T> + Send + Sync>;

/// Что остаётся в слоте после неудачного обновления
#[derive(Clone, Copy)]
enum Fallback {
    Previous,
    Default,
}

struct Slot<T> {
    value: T,
    last_refresh_at: Option<Instant>,
    pending_error: Option<anyhow::Error>,
}

struct Shared<T> {
    producer: Producer<T>,
    slot: RwLock<Slot<T>>,
    ttl_ms: AtomicU64,
    refreshes: AtomicU64,
}

impl<T: Default> Shared<T> {
    fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed))
    }

    /// Запуск функции обновления; паника превращается в обычную ошибку
    fn produce(&self) -> anyhow::Result<T> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.producer)())) {
            Ok(outcome) => outcome,
            Err(payload) => Err(anyhow!("функция обновления паниковала: {}", panic_message(&*payload))),
        }
    }

    /// Запись результата обновления в слот. Вызывающий не должен держать блокировку слота.
    fn store(&self, outcome: anyhow::Result<T>, fallback: Fallback) -> parking_lot::RwLockWriteGuard<'_, Slot<T>> {
        let mut slot = self.slot.write();
        match outcome {
            Ok(value) => {
                slot.value = value;
                slot.last_refresh_at = Some(Instant::now());
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                trace_if_enabled!("Кэш обновлён (всего обновлений: {})", self.refreshes.load(Ordering::Relaxed));
            }
            Err(err) => {
                warn!("Обновление кэша не удалось: {:#}", err);
                if let Fallback::Default = fallback {
                    slot.value = T::default();
                }
                slot.pending_error = Some(err);
            }
        }
        slot
    }

    /// Забирает отложенную ошибку обновления. Её получает ровно один вызывающий.
    fn take_pending_error(&self) -> Result<()> {
        if self.slot.read().pending_error.is_none() {
            return Ok(());
        }
        match self.slot.write().pending_error.take() {
            Some(err) => Err(AhkError::Refresh(err)),
            None => Ok(()),
        }
    }
}

fn ttl_millis(ttl: Duration) -> Result<u64> {
    u64::try_from(ttl.as_millis()).map_err(|_| AhkError::InvalidTtl {
        ttl,
        reason: "не помещается в u64 миллисекунд",
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "неизвестная паника".to_string()
    }
}

enum Mode {
    Lazy {
        timer: CountdownTimer,
    },
    Continuous {
        stop: CancellationToken,
        worker: Mutex<Option<JoinHandle<()>>>,
    },
}

/// Значение от дорогой функции обновления, пересчитываемое не чаще раза в TTL.
///
/// Ошибки функции обновления не вылетают из обновления. Ошибка откладывается в
/// единственный слот и отдаётся следующему `get()` вместо значения; после этого
/// слот очищается и дальнейшие вызовы видят запасное значение.
///
/// При [`RefreshPolicy::Lazy`] устаревший `get()` запускает функцию в вызывающем
/// потоке без блокировки: два потока, увидевшие устаревшее значение, оба запустят
/// функцию, и останется последняя запись. При [`RefreshPolicy::Continuous`]
/// значение обновляет фоновая задача tokio, а `get()` функцию не запускает.
///
/// Паника функции перехватывается через `catch_unwind`, но стандартный panic hook
/// всё равно печатает сообщение (и backtrace при `RUST_BACKTRACE`) в stderr на
/// каждом неудачном цикле. Кэш hook не трогает: если этот вывод мешает,
/// приложение ставит свой через `std::panic::set_hook`.
pub struct RefreshingCache<T> {
    shared: Arc<Shared<T>>,
    mode: Mode,
}

impl<T> RefreshingCache<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    /// Кэш без начального значения (устаревший, хранит `T::default()`).
    ///
    /// Непрерывному кэшу нужен запущенный tokio runtime и ненулевой TTL.
    pub fn new<F>(producer: F, ttl: Duration, policy: RefreshPolicy) -> Result<Self>
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::build(None, Box::new(producer), ttl, policy)
    }

    /// Кэш с начальным значением `initial`. Ленивый кэш считает его свежим в
    /// течение одного TTL.
    pub fn with_initial<F>(initial: T, producer: F, ttl: Duration, policy: RefreshPolicy) -> Result<Self>
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::build(Some(initial), Box::new(producer), ttl, policy)
    }

    pub fn five_seconds<F>(producer: F, policy: RefreshPolicy) -> Result<Self>
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::new(producer, Duration::from_secs(5), policy)
    }

    pub fn seconds<F>(producer: F, seconds: u32, policy: RefreshPolicy) -> Result<Self>
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::new(producer, Duration::from_secs(u64::from(seconds)), policy)
    }

    pub fn minutes<F>(producer: F, minutes: u32, policy: RefreshPolicy) -> Result<Self>
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::new(producer, Duration::from_secs(u64::from(minutes) * 60), policy)
    }

    pub fn hours<F>(producer: F, hours: u32, policy: RefreshPolicy) -> Result<Self>
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::new(producer, Duration::from_secs(u64::from(hours) * 60 * 60), policy)
    }

    pub fn minute<F>(producer: F, policy: RefreshPolicy) -> Result<Self>
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::minutes(producer, 1, policy)
    }

    pub fn hour<F>(producer: F, policy: RefreshPolicy) -> Result<Self>
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::hours(producer, 1, policy)
    }

    fn build(initial: Option<T>, producer: Producer<T>, ttl: Duration, policy: RefreshPolicy) -> Result<Self> {
        let ttl_ms = ttl_millis(ttl)?;

        let has_initial = initial.is_some();
        let shared = Arc::new(Shared {
            producer,
            slot: RwLock::new(Slot {
                value: initial.unwrap_or_default(),
                last_refresh_at: None,
                pending_error: None,
            }),
            ttl_ms: AtomicU64::new(ttl_ms),
            refreshes: AtomicU64::new(0),
        });

        let mode = match policy {
            RefreshPolicy::Lazy => {
                let timer = if has_initial {
                    CountdownTimer::started(ttl)
                } else {
                    CountdownTimer::new(ttl)
                };
                Mode::Lazy { timer }
            }
            RefreshPolicy::Continuous => {
                if ttl_ms == 0 {
                    return Err(AhkError::InvalidTtl {
                        ttl,
                        reason: "непрерывное обновление требует TTL больше нуля",
                    });
                }
                let handle = tokio::runtime::Handle::try_current().map_err(|e| {
                    ahk_error!(service_unavailable, "непрерывное обновление требует tokio runtime: {}", e)
                })?;
                let stop = CancellationToken::new();
                let worker = handle.spawn(refresher_loop(Arc::clone(&shared), stop.clone()));
                Mode::Continuous {
                    stop,
                    worker: Mutex::new(Some(worker)),
                }
            }
        };

        debug_if_enabled!("Создан кэш: политика {}, TTL {:?}", policy, ttl);
        Ok(Self { shared, mode })
    }

    /// Текущее значение. Ленивый кэш с истёкшим TTL сначала обновляется.
    ///
    /// Если предыдущее обновление упало, вместо значения возвращается его ошибка, один раз.
    pub fn get(&self) -> Result<T> {
        self.shared.take_pending_error()?;

        match &self.mode {
            Mode::Continuous { .. } => Ok(self.shared.slot.read().value.clone()),
            Mode::Lazy { timer } => {
                if timer.working() {
                    return Ok(self.shared.slot.read().value.clone());
                }

                debug_if_enabled!("Кэш устарел, обновляем в вызывающем потоке");
                let outcome = self.shared.produce();
                let value = self.shared.store(outcome, Fallback::Previous).value.clone();
                // Неудачное обновление тоже взводит таймер: сломанная функция запускается не чаще раза в TTL
                timer.reset();
                Ok(value)
            }
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        match self.mode {
            Mode::Lazy { .. } => RefreshPolicy::Lazy,
            Mode::Continuous { .. } => RefreshPolicy::Continuous,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.shared.ttl()
    }

    /// Меняет TTL непрерывного кэша, фоновая задача подхватит его на следующем цикле.
    /// У ленивого кэша TTL фиксируется при создании.
    pub fn set_ttl(&self, ttl: Duration) -> Result<()> {
        match &self.mode {
            Mode::Lazy { .. } => Err(ahk_error!(
                invalid_operation,
                "TTL ленивого кэша нельзя изменить после создания"
            )),
            Mode::Continuous { .. } => {
                let ttl_ms = ttl_millis(ttl)?;
                if ttl_ms == 0 {
                    return Err(AhkError::InvalidTtl {
                        ttl,
                        reason: "непрерывное обновление требует TTL больше нуля",
                    });
                }
                self.shared.ttl_ms.store(ttl_ms, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Количество успешных обновлений
    pub fn refresh_count(&self) -> u64 {
        self.shared.refreshes.load(Ordering::Relaxed)
    }

    pub fn last_refresh_at(&self) -> Option<Instant> {
        self.shared.slot.read().last_refresh_at
    }

    /// Останавливает фоновое обновление непрерывного кэша. Ожидание TTL прерывается
    /// сразу, результат уже идущего обновления отбрасывается. Ленивому кэшу нечего останавливать.
    pub fn dispose(&self) {
        if let Mode::Continuous { stop, .. } = &self.mode {
            if !stop.is_cancelled() {
                info!("Остановка фонового обновления кэша");
                stop.cancel();
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        match &self.mode {
            Mode::Lazy { .. } => false,
            Mode::Continuous { stop, .. } => stop.is_cancelled(),
        }
    }

    /// `dispose()` и ожидание завершения фоновой задачи
    pub async fn shutdown(&self) {
        self.dispose();
        let worker = match &self.mode {
            Mode::Continuous { worker, .. } => worker.lock().take(),
            Mode::Lazy { .. } => None,
        };
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Фоновое обновление кэша завершилось с ошибкой: {}", e);
            }
        }
    }
}

impl<T> Drop for RefreshingCache<T> {
    fn drop(&mut self) {
        if let Mode::Continuous { stop, .. } = &self.mode {
            stop.cancel();
        }
    }
}

impl<T> fmt::Debug for RefreshingCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("RefreshingCache");
        match &self.mode {
            Mode::Lazy { timer } => out
                .field("policy", &RefreshPolicy::Lazy)
                .field("fresh_for", &timer.remaining()),
            Mode::Continuous { stop, .. } => out
                .field("policy", &RefreshPolicy::Continuous)
                .field("disposed", &stop.is_cancelled()),
        };
        out.field("ttl_ms", &self.shared.ttl_ms.load(Ordering::Relaxed))
            .field("refreshes", &self.shared.refreshes.load(Ordering::Relaxed))
            .finish()
    }
}

/// Фоновый цикл: ждём TTL, обновляем, повторяем до отмены
async fn refresher_loop<T>(shared: Arc<Shared<T>>, stop: CancellationToken)
where
    T: Default + Send + Sync + 'static,
{
    debug_if_enabled!("Фоновое обновление кэша запущено");
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(shared.ttl()) => {}
        }

        let worker = Arc::clone(&shared);
        let outcome = match tokio::task::spawn_blocking(move || worker.produce()).await {
            Ok(outcome) => outcome,
            Err(e) => Err(anyhow!("задача обновления прервана: {}", e)),
        };

        if stop.is_cancelled() {
            break;
        }
        drop(shared.store(outcome, Fallback::Default));
    }
    debug_if_enabled!("Фоновое обновление кэша остановлено");
}
