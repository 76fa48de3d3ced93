// ── Command dispatcher ──
//
// Priority queue of outbound commands drained by one sequential loop.
// Callers push from anywhere; only the loop pops. Sending one command
// at a time keeps commands to the same camera in submission order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{Command, Priority};
use crate::config::{FleetTiming, TransportMode};
use crate::error::TransportError;
use crate::event::{EventSink, FleetEvent};
use crate::transport::{CommandTransport, MockTransport, UdpTransport};

// ── Queue ────────────────────────────────────────────────────────

/// Heap entry ordered by priority, then by arrival (earlier first).
#[derive(Debug)]
struct Queued {
    priority: Priority,
    seq: u64,
    command: Command,
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

#[derive(Debug, Default)]
struct CommandQueue {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
}

impl CommandQueue {
    /// Insert and return the 1-based position the command will be sent in.
    fn push(&mut self, command: Command) -> usize {
        let priority = command.priority;
        let ahead = self.heap.iter().filter(|q| q.priority >= priority).count();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Queued {
            priority,
            seq,
            command,
        });
        ahead + 1
    }

    fn pop(&mut self) -> Option<Command> {
        self.heap.pop().map(|q| q.command)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn clear(&mut self) -> usize {
        let count = self.heap.len();
        self.heap.clear();
        count
    }
}

// ── Statistics ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    bytes: AtomicU64,
}

/// Snapshot of dispatcher counters. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub retries: u64,
    pub bytes_sent: u64,
    pub queued: usize,
    pub started_at: DateTime<Utc>,
}

// ── Dispatcher ───────────────────────────────────────────────────

/// Cheaply cloneable handle to the shared queue and its loop state.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Debug)]
struct DispatcherInner {
    queue: Mutex<CommandQueue>,
    /// Set while a popped command is being sent. Only written under the
    /// queue lock so `is_idle` never sees a command in neither place.
    busy: AtomicBool,
    wake: Notify,
    counters: Counters,
    started_at: DateTime<Utc>,
    mode: watch::Receiver<TransportMode>,
    mock: Arc<dyn CommandTransport>,
    real: Arc<dyn CommandTransport>,
    events: EventSink,
    idle: Duration,
}

impl CommandDispatcher {
    /// Dispatcher with the standard mock and UDP transports.
    pub fn new(mode: watch::Receiver<TransportMode>, events: EventSink, timing: &FleetTiming) -> Self {
        Self::with_transports(
            mode,
            events,
            timing.dispatch_idle,
            Arc::new(MockTransport::new(timing.mock_send_delay)),
            Arc::new(UdpTransport::new(timing.send_timeout)),
        )
    }

    pub fn with_transports(
        mode: watch::Receiver<TransportMode>,
        events: EventSink,
        idle: Duration,
        mock: Arc<dyn CommandTransport>,
        real: Arc<dyn CommandTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                queue: Mutex::new(CommandQueue::default()),
                busy: AtomicBool::new(false),
                wake: Notify::new(),
                counters: Counters::default(),
                started_at: Utc::now(),
                mode,
                mock,
                real,
                events,
                idle,
            }),
        }
    }

    fn queue(&self) -> MutexGuard<'_, CommandQueue> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Caller surface ───────────────────────────────────────────

    /// Queue a command and return its 1-based dispatch position.
    pub fn enqueue(&self, command: Command) -> usize {
        let camera = command.camera;
        let kind = command.kind();
        let priority = command.priority;
        let description = command.description();

        let position = self.queue().push(command);
        self.inner.wake.notify_one();

        debug!(%camera, %priority, position, command = %description, "command queued");
        self.inner.events.emit(FleetEvent::CommandQueued {
            camera,
            kind,
            priority,
            description,
            position,
        });
        position
    }

    pub fn queue_len(&self) -> usize {
        self.queue().len()
    }

    /// Nothing queued and nothing being sent.
    pub fn is_idle(&self) -> bool {
        let queue = self.queue();
        queue.len() == 0 && !self.inner.busy.load(AtomicOrdering::Acquire)
    }

    /// Drop every queued command and return how many were discarded.
    /// A command already being sent is not affected.
    pub fn clear(&self) -> usize {
        let count = self.queue().clear();
        if count > 0 {
            info!(count, "command queue cleared");
        }
        self.inner.events.emit(FleetEvent::QueueCleared { count });
        count
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.inner.counters;
        DispatchStats {
            commands_sent: c.sent.load(AtomicOrdering::Relaxed),
            commands_failed: c.failed.load(AtomicOrdering::Relaxed),
            retries: c.retries.load(AtomicOrdering::Relaxed),
            bytes_sent: c.bytes.load(AtomicOrdering::Relaxed),
            queued: self.queue_len(),
            started_at: self.inner.started_at,
        }
    }

    // ── Dispatch loop ────────────────────────────────────────────

    /// Drain the queue until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        debug!("command dispatcher started");

        loop {
            let next = {
                let mut queue = self.queue();
                let next = queue.pop();
                self.inner.busy.store(next.is_some(), AtomicOrdering::Release);
                next
            };
            match next {
                Some(command) => {
                    let label = command.to_string();
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            debug!(command = %label, "send interrupted by shutdown");
                            break;
                        }
                        () = self.dispatch(command) => self.release(),
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = self.inner.wake.notified() => {}
                        () = tokio::time::sleep(self.inner.idle) => {}
                    }
                }
            }
        }
        self.release();

        let stats = self.stats();
        info!(
            sent = stats.commands_sent,
            failed = stats.commands_failed,
            retries = stats.retries,
            bytes = stats.bytes_sent,
            abandoned = stats.queued,
            "command dispatcher stopped"
        );
    }

    /// Mark the loop as holding no command. Taken under the queue lock
    /// like every other write to `busy`.
    fn release(&self) {
        let _queue = self.queue();
        self.inner.busy.store(false, AtomicOrdering::Release);
    }

    async fn dispatch(&self, command: Command) {
        let mode = *self.inner.mode.borrow();
        let transport = match mode {
            TransportMode::Mock => &self.inner.mock,
            TransportMode::Real => &self.inner.real,
        };

        match transport.send(command.target, command.payload()).await {
            Ok(bytes) => self.on_sent(&command, bytes, mode),
            Err(err) => self.on_failed(command, &err),
        }
    }

    fn on_sent(&self, command: &Command, bytes: usize, mode: TransportMode) {
        let c = &self.inner.counters;
        c.sent.fetch_add(1, AtomicOrdering::Relaxed);
        c.bytes
            .fetch_add(u64::try_from(bytes).unwrap_or(u64::MAX), AtomicOrdering::Relaxed);

        debug!(
            camera = %command.camera,
            target = %command.target,
            %mode,
            bytes,
            elapsed_ms = command.created_at.elapsed().as_millis(),
            command = %command.description(),
            "command sent"
        );
        self.inner.events.emit(FleetEvent::CommandSent {
            camera: command.camera,
            kind: command.kind(),
            description: command.description(),
            bytes,
            attempts: command.attempts(),
            mode,
        });
    }

    /// `Sending -> Failed`: either back to `Queued` at the same priority
    /// or terminal, reported exactly once.
    fn on_failed(&self, command: Command, err: &TransportError) {
        match command.retry() {
            Ok(retry) => {
                self.inner.counters.retries.fetch_add(1, AtomicOrdering::Relaxed);
                warn!(
                    camera = %retry.camera,
                    attempt = retry.retries,
                    max_retries = retry.max_retries,
                    error = %err,
                    command = %retry.description(),
                    "send failed, retrying"
                );
                self.queue().push(retry);
                self.inner.wake.notify_one();
            }
            Err(spent) => {
                self.inner.counters.failed.fetch_add(1, AtomicOrdering::Relaxed);
                error!(
                    camera = %spent.camera,
                    attempts = spent.attempts(),
                    error = %err,
                    command = %spent.description(),
                    "command failed"
                );
                self.inner.events.emit(FleetEvent::CommandFailed {
                    camera: spent.camera,
                    kind: spent.kind(),
                    description: spent.description(),
                    error: err.to_string(),
                    attempts: spent.attempts(),
                });
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
