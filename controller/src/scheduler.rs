use std::{collections::HashMap, time::Duration};

use tokio::{sync::mpsc::UnboundedSender, task::AbortHandle};
use zonelight_common::TimerKey;

use crate::runtime::ZoneEvent;

/// One pending timer per key. Rescheduling a key aborts the previous timer;
/// a timer that already fired is filtered by its token on the engine side.
pub struct Scheduler {
    events: UnboundedSender<ZoneEvent>,
    timers: HashMap<TimerKey, AbortHandle>,
}

impl Scheduler {
    pub fn new(events: UnboundedSender<ZoneEvent>) -> Self {
        Self {
            events,
            timers: HashMap::new(),
        }
    }

    pub fn schedule(&mut self, key: TimerKey, token: u64, delay: Duration) {
        self.cancel(key);
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ZoneEvent::Timer { key, token });
        });
        self.timers.insert(key, task.abort_handle());
    }

    pub fn cancel(&mut self, key: TimerKey) {
        if let Some(timer) = self.timers.remove(&key) {
            timer.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for timer in self.timers.values() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    fn fired(event: ZoneEvent) -> (TimerKey, u64) {
        match event {
            ZoneEvent::Timer { key, token } => (key, token),
            _ => panic!("expected a timer event"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_pending_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(tx);

        scheduler.schedule(TimerKey::Debounce, 1, Duration::from_millis(1_000));
        tokio::time::sleep(Duration::from_millis(500)).await;
        scheduler.schedule(TimerKey::Debounce, 2, Duration::from_millis(1_000));

        let event = rx.recv().await.unwrap();
        assert_eq!(fired(event), (TimerKey::Debounce, 2));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(tx);

        scheduler.schedule(TimerKey::Poll, 7, Duration::from_secs(300));
        scheduler.schedule(TimerKey::VerifyRetry, 3, Duration::from_secs(3));
        scheduler.cancel(TimerKey::Poll);

        assert_eq!(fired(rx.recv().await.unwrap()), (TimerKey::VerifyRetry, 3));
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(rx.try_recv().is_err());
    }
}
