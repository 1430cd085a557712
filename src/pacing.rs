//! Token pacing
//!
//! Incoming response fragments are queued and revealed one per tick of a
//! fixed-period timer, so bursty delivery renders at a steady cadence. The
//! buffer never touches the store itself: each tick is delivered as a
//! message to the runtime, which calls [`PacingBuffer::tick`] and appends the
//! returned fragment.
//!
//! Every timer start gets a new generation and its ticks carry it, so a tick
//! still queued from a stopped timer is recognised and ignored.

use crate::timer::{self, TimerHandle};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct PacingBuffer<M> {
    queue: VecDeque<String>,
    period: Duration,
    tick_tx: mpsc::Sender<M>,
    make_tick: fn(u64) -> M,
    timer: Option<TimerHandle>,
    /// Generation of the running timer, bumped on every start
    generation: u64,
}

impl<M: Send + 'static> PacingBuffer<M> {
    pub fn new(period: Duration, tick_tx: mpsc::Sender<M>, make_tick: fn(u64) -> M) -> Self {
        Self {
            queue: VecDeque::new(),
            period,
            tick_tx,
            make_tick,
            timer: None,
            generation: 0,
        }
    }

    /// Queue a fragment and make sure the drain timer runs
    pub fn push(&mut self, fragment: impl Into<String>) {
        let fragment = fragment.into();
        if fragment.is_empty() {
            return;
        }
        self.queue.push_back(fragment);
        self.start();
    }

    /// Start the drain timer. No-op while one is already running.
    pub fn start(&mut self) {
        if self.timer.is_some() {
            return;
        }
        self.generation += 1;
        let generation = self.generation;
        let make_tick = self.make_tick;
        tracing::trace!(generation, period_ms = self.period.as_millis(), "Starting pacing timer");
        self.timer = Some(timer::every(self.period, self.tick_tx.clone(), move || {
            make_tick(generation)
        }));
    }

    pub fn stop(&mut self) {
        if self.timer.take().is_some() {
            tracing::trace!(generation = self.generation, "Stopped pacing timer");
        }
    }

    /// Handle one timer tick: release the next fragment.
    ///
    /// The timer stops itself once the queue is empty and the turn is over.
    /// Ticks from a stopped timer release nothing.
    pub fn tick(&mut self, generation: u64, typing: bool) -> Option<String> {
        if self.timer.is_none() || generation != self.generation {
            tracing::trace!(generation, current = self.generation, "Ignoring stale pacing tick");
            return None;
        }
        let next = self.queue.pop_front();
        if self.queue.is_empty() && !typing {
            self.stop();
        }
        next
    }

    /// Drop queued fragments without revealing them
    pub fn clear(&mut self) {
        self.queue.clear();
        self.stop();
    }

    /// Take every queued fragment at once, in order, and stop the timer
    pub fn drain(&mut self) -> String {
        let text: String = self.queue.drain(..).collect();
        self.stop();
        text
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }
}
