use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Однократный обратный отсчёт, который можно взводить повторно.
///
/// Отдельного потока таймера нет: истечение замечает тот, кто следующим смотрит
/// на таймер (`working()`, `wait()` или очередной `start()`). Каждый взвод
/// получает номер эпохи, по которому ожидающие понимают, что их взвод закончился.
pub struct CountdownTimer {
    state: Mutex<TimerState>,
    ended: Condvar,
}

#[derive(Debug)]
struct TimerState {
    interval: Duration,
    deadline: Option<Instant>,
    epoch: u64,
}

impl TimerState {
    fn armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Снимает взвод, если срок прошёл. true, если снял.
    fn expire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

impl CountdownTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: Mutex::new(TimerState {
                interval,
                deadline: None,
                epoch: 0,
            }),
            ended: Condvar::new(),
        }
    }

    pub fn started(interval: Duration) -> Self {
        let timer = Self::new(interval);
        timer.start();
        timer
    }

    pub fn interval(&self) -> Duration {
        self.state.lock().interval
    }

    /// Новый интервал действует со следующего `start()`, идущий отсчёт сохраняет свой срок
    pub fn set_interval(&self, interval: Duration) {
        self.state.lock().interval = interval;
    }

    /// Взводит таймер на `interval` от текущего момента. Нулевой интервал не взводит.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.armed() {
            // Перезапуск завершает предыдущий взвод
            state.epoch = state.epoch.wrapping_add(1);
            self.ended.notify_all();
        }
        if state.interval.is_zero() {
            state.deadline = None;
            return;
        }
        state.deadline = Some(Instant::now() + state.interval);
        state.epoch = state.epoch.wrapping_add(1);
    }

    /// Снимает взвод и отпускает ожидающих
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.deadline.take().is_some() {
            state.epoch = state.epoch.wrapping_add(1);
            self.ended.notify_all();
        }
    }

    /// Stop + start.
    pub fn reset(&self) {
        self.stop();
        self.start();
    }

    /// true, пока таймер взведён и срок не истёк
    pub fn working(&self) -> bool {
        let mut state = self.state.lock();
        if state.expire_if_due(Instant::now()) {
            self.ended.notify_all();
        }
        state.armed()
    }

    /// Остаток до истечения, `None` если не взведён
    pub fn remaining(&self) -> Option<Duration> {
        let state = self.state.lock();
        state
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Блокирует до конца текущего взвода: истечения или `stop()`/`reset()`.
    /// Если таймер не взведён, возвращается сразу. Все ожидающие одного взвода
    /// отпускаются вместе.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        let epoch = state.epoch;
        loop {
            if state.epoch != epoch {
                return;
            }
            let deadline = match state.deadline {
                Some(deadline) => deadline,
                None => return,
            };
            if state.expire_if_due(Instant::now()) {
                self.ended.notify_all();
                return;
            }
            // Ложные пробуждения и таймауты возвращают к проверкам выше
            let _ = self.ended.wait_until(&mut state, deadline);
        }
    }
}

impl std::fmt::Debug for CountdownTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountdownTimer")
            .field("state", &*self.state.lock())
            .finish()
    }
}
