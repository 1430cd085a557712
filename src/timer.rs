//! Cancellable timers that deliver messages into the runtime's channel
//!
//! Each timer is a spawned task paired with a [`CancellationToken`]. Dropping
//! the [`TimerHandle`] cancels it, so holding at most one handle per purpose
//! guarantees at most one live timer per purpose.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct TimerHandle {
    cancel: CancellationToken,
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Deliver `message` once after `delay`
pub fn after<M>(delay: Duration, tx: mpsc::Sender<M>, message: M) -> TimerHandle
where
    M: Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = token.cancelled() => {}
            () = tokio::time::sleep(delay) => {
                let _ = tx.send(message).await;
            }
        }
    });

    TimerHandle { cancel }
}

/// Deliver `make()` every `period`, first tick one period from now
pub fn every<M, F>(period: Duration, tx: mpsc::Sender<M>, make: F) -> TimerHandle
where
    M: Send + 'static,
    F: Fn() -> M + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = interval.tick() => {
                    if tx.send(make()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    TimerHandle { cancel }
}
