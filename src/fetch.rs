//! Background fetch with a bounded result queue and a completion signal.
//!
//! A worker thread pushes items into a bounded channel and, once it is
//! done, reports its final `Result` on a separate one-shot channel. The
//! consumer drains every item first and only then reads the completion,
//! so an error raised after some items were produced is never lost.

use anyhow::{Result, anyhow};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

/// Producer end handed to the worker closure.
pub struct Sink<T> {
    tx: SyncSender<T>,
}

impl<T> Sink<T> {
    /// Blocks while the queue is full. Fails once the consumer is gone,
    /// which is the worker's cue to stop.
    pub fn push(&self, item: T) -> Result<()> {
        self.tx
            .send(item)
            .map_err(|_| anyhow!("fetch consumer went away"))
    }
}

/// Consumer end: the item queue plus the worker's completion signal.
pub struct Fetch<T, R> {
    items: Receiver<T>,
    done: Receiver<Result<R>>,
    worker: JoinHandle<()>,
}

/// Runs `producer` on its own thread with a queue of `capacity` items.
pub fn spawn<T, R, F>(capacity: usize, producer: F) -> Fetch<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: FnOnce(&Sink<T>) -> Result<R> + Send + 'static,
{
    let (tx, items) = mpsc::sync_channel(capacity);
    let (done_tx, done) = mpsc::sync_channel(1);

    let worker = thread::spawn(move || {
        let sink = Sink { tx };
        let outcome = producer(&sink);
        // close the queue before reporting so the consumer's drain ends
        drop(sink);
        let _ = done_tx.send(outcome);
    });

    Fetch {
        items,
        done,
        worker,
    }
}

impl<T, R> Fetch<T, R> {
    /// Collects every item, then the worker's outcome.
    pub fn drain_partial(self) -> (Vec<T>, Result<R>) {
        let items: Vec<T> = self.items.iter().collect();
        let outcome = match self.done.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow!("fetch worker stopped without reporting a result")),
        };
        if self.worker.join().is_err() {
            log::warn!("fetch worker panicked");
        }
        (items, outcome)
    }

    /// Like [`Fetch::drain_partial`], but any worker error wins over the
    /// items already received.
    pub fn drain(self) -> Result<(Vec<T>, R)> {
        let (items, outcome) = self.drain_partial();
        outcome.map(|r| (items, r))
    }
}
