// Copyright 2020 Joyent, Inc.

//! The Pending Request Table.
//!
//! Each socket request in flight has exactly one entry here, keyed by its
//! correlation id. An entry leaves the table through exactly one of:
//!
//! * a matching response frame from the same connection generation
//! * its deadline timer firing
//! * teardown via `reject_all`
//!
//! Whichever gets there first settles the completion handle; every later
//! attempt finds no entry and does nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use slog::{debug, o, trace, warn, Drain, Logger};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::error::TransportError;
use crate::protocol::{CorrelationId, IncomingFrame, Response};

pub type Outcome = Result<Response, TransportError>;

/// The sending half a waiting caller is parked on.
pub type CompletionHandle = oneshot::Sender<Outcome>;

struct PendingEntry {
    generation: u64,
    deadline: Instant,
    handle: CompletionHandle,
    timer: Option<JoinHandle<()>>,
}

/// What became of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The frame settled a waiting caller.
    Delivered,
    /// Well-formed, but nobody on this generation is waiting for it.
    Unmatched,
    /// Not JSON, or no correlation id.
    Malformed,
}

#[derive(Clone)]
pub struct PendingTable {
    entries: Arc<Mutex<HashMap<CorrelationId, PendingEntry>>>,
    log: Logger,
}

impl PendingTable {
    pub fn new(log: Option<&Logger>) -> PendingTable {
        let log = match log {
            Some(l) => l.new(o!("component" => "pending")),
            None => Logger::root(slog_stdlog::StdLog.fuse(), o!()),
        };

        PendingTable {
            entries: Arc::new(Mutex::new(HashMap::new())),
            log,
        }
    }

    /*
     * Every critical section below is a plain map operation with no await
     * inside, so a poisoned lock can only mean a panic in another thread
     * between two map calls; the map itself is still consistent.
     */
    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert an entry for a request written on connection `generation` and
    /// arm its deadline. Must be called from within a tokio runtime.
    pub fn register(
        &self,
        id: CorrelationId,
        generation: u64,
        handle: CompletionHandle,
        timeout: Duration,
    ) {
        let deadline = Instant::now() + timeout;
        let mut entries = self.lock();

        if let Some(prev) = entries.remove(&id) {
            // Ids are never reused; a collision means a caller bug.
            warn!(self.log, "replacing pending entry with duplicate id";
                  "request_id" => %id);
            settle(prev, Err(TransportError::Shutdown));
        }

        let table = self.clone();
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            sleep_until(deadline).await;
            table.expire(&timer_id);
        });

        trace!(self.log, "registered request";
               "request_id" => %id, "generation" => generation);
        entries.insert(
            id,
            PendingEntry {
                generation,
                deadline,
                handle,
                timer: Some(timer),
            },
        );
    }

    /// Settle `id` with a successful response. Returns false if no such
    /// entry exists any more.
    pub fn resolve(&self, id: &CorrelationId, response: Response) -> bool {
        self.finish(id, Ok(response))
    }

    /// Settle `id` with an error. Returns false if no such entry exists any
    /// more.
    pub fn reject(&self, id: &CorrelationId, err: TransportError) -> bool {
        self.finish(id, Err(err))
    }

    fn finish(&self, id: &CorrelationId, outcome: Outcome) -> bool {
        let entry = self.lock().remove(id);
        match entry {
            Some(mut entry) => {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                settle(entry, outcome);
                true
            }
            None => false,
        }
    }

    /// Called by an entry's own timer.
    fn expire(&self, id: &CorrelationId) {
        let entry = self.lock().remove(id);
        if let Some(mut entry) = entry {
            debug!(self.log, "request timed out"; "request_id" => %id);
            // Dropping our own JoinHandle detaches; it must not abort us.
            entry.timer.take();
            settle(entry, Err(TransportError::Timeout));
        }
    }

    /// Route one inbound text frame received on connection `generation`.
    ///
    /// Frames that cannot be correlated are logged and dropped; they never
    /// change the table.
    pub fn dispatch(&self, generation: u64, text: &str) -> Dispatch {
        let frame = match IncomingFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(self.log, "discarding malformed frame"; "err" => %e);
                return Dispatch::Malformed;
            }
        };
        let (id, outcome) = frame.into_outcome();

        let entry = {
            let mut entries = self.lock();
            match entries.get(&id).map(|e| e.generation) {
                Some(g) if g == generation => entries.remove(&id),
                Some(g) => {
                    debug!(self.log, "discarding frame from another connection generation";
                           "request_id" => %id,
                           "frame_generation" => generation,
                           "entry_generation" => g);
                    None
                }
                None => {
                    debug!(self.log, "discarding unmatched frame"; "request_id" => %id);
                    None
                }
            }
        };

        match entry {
            Some(mut entry) => {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                let remaining = entry.deadline.saturating_duration_since(Instant::now());
                trace!(self.log, "delivering response";
                       "request_id" => %id, "remaining" => ?remaining);
                settle(entry, outcome.map_err(TransportError::Server));
                Dispatch::Delivered
            }
            None => Dispatch::Unmatched,
        }
    }

    /// Settle every outstanding entry with `Shutdown`.
    pub fn reject_all(&self) -> usize {
        let drained: Vec<(CorrelationId, PendingEntry)> = self.lock().drain().collect();
        let count = drained.len();
        for (_, mut entry) in drained {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            settle(entry, Err(TransportError::Shutdown));
        }
        if count > 0 {
            debug!(self.log, "rejected outstanding requests at teardown"; "count" => count);
        }
        count
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

fn settle(entry: PendingEntry, outcome: Outcome) {
    // Err means the caller already stopped waiting.
    let _ = entry.handle.send(outcome);
}
