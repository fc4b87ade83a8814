use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

type PendingTimers = Arc<Mutex<HashMap<String, PendingTimer>>>;

/// Trailing-edge debounce keyed by change path. Each new event for a key
/// restarts that key's window; keys never delay each other.
pub struct DebounceRouter {
    window: Duration,
    pending: PendingTimers,
    next_generation: AtomicU64,
}

impl DebounceRouter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedules `fire` to run once `window` passes without another event
    /// for `key`. Must be called from within a Tokio runtime.
    pub fn on_event<F>(&self, key: impl Into<String>, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let key = key.into();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let window = self.window;
        let pending = self.pending.clone();

        let mut timers = lock_timers(&self.pending);
        if let Some(previous) = timers.remove(&key) {
            previous.handle.abort();
            trace!(%key, "restarted debounce window");
        }

        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            {
                let mut timers = lock_timers(&pending);
                match timers.get(&timer_key) {
                    Some(current) if current.generation == generation => {
                        timers.remove(&timer_key);
                    }
                    _ => return,
                }
            }
            fire();
        });

        timers.insert(key, PendingTimer { generation, handle });
    }

    /// Drops every pending timer without firing it.
    pub fn cancel_all(&self) {
        let mut timers = lock_timers(&self.pending);
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        lock_timers(&self.pending).len()
    }
}

impl Drop for DebounceRouter {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn lock_timers(timers: &PendingTimers) -> MutexGuard<'_, HashMap<String, PendingTimer>> {
    match timers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    const WINDOW: Duration = Duration::from_millis(100);

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn settle(duration: Duration) {
        tokio::time::sleep(duration).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_on_one_key_fires_once_after_the_last_event() {
        let router = DebounceRouter::new(WINDOW);
        let fired = Arc::new(Mutex::new(Vec::<Instant>::new()));

        let started = Instant::now();
        for _ in 0..6 {
            let fired = fired.clone();
            router.on_event("tasks/fn-1.1.json", move || {
                fired.lock().unwrap().push(Instant::now());
            });
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let last_event_at = started + Duration::from_millis(100);

        settle(Duration::from_millis(60)).await;
        assert!(fired.lock().unwrap().is_empty());

        settle(Duration::from_millis(100)).await;
        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert!(fired[0] >= last_event_at + WINDOW);
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_fire_independently() {
        let router = DebounceRouter::new(WINDOW);
        let counter = Arc::new(AtomicUsize::new(0));

        router.on_event("epics/fn-1.json", counting(&counter));
        router.on_event("tasks/fn-1.1.json", counting(&counter));
        router.on_event("config.json", counting(&counter));
        assert_eq!(router.pending_count(), 3);

        settle(WINDOW + Duration::from_millis(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_events_each_fire() {
        let router = DebounceRouter::new(WINDOW);
        let counter = Arc::new(AtomicUsize::new(0));

        router.on_event("tasks/fn-1.1.json", counting(&counter));
        settle(WINDOW * 2).await;
        router.on_event("tasks/fn-1.1.json", counting(&counter));
        settle(WINDOW * 2).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_drops_pending_notifications() {
        let router = DebounceRouter::new(WINDOW);
        let counter = Arc::new(AtomicUsize::new(0));

        router.on_event("tasks/fn-1.1.json", counting(&counter));
        router.on_event("epics/fn-1.json", counting(&counter));
        router.cancel_all();
        assert_eq!(router.pending_count(), 0);

        settle(WINDOW * 3).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
