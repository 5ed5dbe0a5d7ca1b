//! The consumer dispatcher ring.

use crate::{AbortReason, CompletionResult, ConsumerInput, ConsumerOutcome, ElementId};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, error, trace};

/// A pipeline stage.
///
/// Consumers borrow the element exclusively for the duration of the call and
/// must not retain references to it.
pub type Consumer = Box<dyn FnMut(&mut ConsumerInput) -> ConsumerOutcome + Send>;

/// Terminal per-element hook: flushes status subscribers and reclaims memory.
/// Runs exactly once per element, after the last consumer released it.
pub type Inspector = Box<dyn FnMut(&ConsumerInput, &CompletionResult) + Send>;

/// Caller-supplied completion callback, invoked exactly once after the
/// inspector with the element id and its completion result.
pub type CompletionHandler = Box<dyn FnOnce(ElementId, &CompletionResult) + Send>;

/// Errors from element submission.
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("dispatcher {0} is full")]
    Full(String),

    #[error("dispatcher {0} is shutting down")]
    ShutDown(String),

    #[error("cannot submit an empty input to dispatcher {0}")]
    EmptyInput(String),
}

/// Construction options for a [`ConsumerDispatcher`].
#[derive(Debug, Clone)]
pub struct ConsumerDispatcherOptions {
    /// Dispatcher name, used in logs and counter labels.
    pub name: String,
    /// Ring capacity: the maximum number of in-flight elements.
    pub size: usize,
    /// Emit a trace log every this many elements.
    pub element_trace_interval: u64,
    /// Fail submissions with [`DispatcherError::Full`] instead of blocking
    /// when the ring is full.
    pub should_abort_when_full: bool,
}

impl ConsumerDispatcherOptions {
    /// Options with default trace interval and blocking backpressure.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            element_trace_interval: 1,
            should_abort_when_full: false,
        }
    }
}

/// An element occupying a ring slot.
struct ElementState {
    input: ConsumerInput,
    /// Set as soon as some consumer completed or aborted the element; later
    /// consumers skip it but still advance their cursors past it.
    terminal: Option<CompletionResult>,
    completion: Option<CompletionHandler>,
}

struct ProducerState {
    next_seq: u64,
}

struct Shared {
    options: ConsumerDispatcherOptions,
    slots: Vec<Mutex<Option<ElementState>>>,
    /// One cursor per consumer plus a final one for the inspector. A cursor
    /// holds the next sequence its stage will process; stage k may process
    /// sequence N only once cursor k−1 has advanced past N.
    cursors: Vec<AtomicU64>,
    /// Mirror of `ProducerState::next_seq` for lock-free reads.
    published: AtomicU64,
    producer: Mutex<ProducerState>,
    work_available: Condvar,
    accepting: AtomicBool,
    last_result: Mutex<CompletionResult>,
}

impl Shared {
    fn capacity(&self) -> u64 {
        self.options.size as u64
    }

    fn inspector_cursor(&self) -> &AtomicU64 {
        self.cursors.last().expect("cursor per stage")
    }
}

/// Bounded in-order dispatcher pushing elements through a consumer chain.
///
/// Every submitted input is assigned the next element id, placed in the next
/// free ring slot, and processed by each consumer in order on that consumer's
/// worker thread. When the element exits the last consumer (or some consumer
/// terminated it early), the inspector runs, then the completion handler,
/// then the slot is released.
///
/// Dropping the dispatcher stops new submissions, drains in-flight elements
/// through every stage, and joins the workers.
pub struct ConsumerDispatcher {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ConsumerDispatcher {
    /// Spawn a dispatcher with one worker thread per consumer plus one for
    /// the inspector.
    ///
    /// # Panics
    ///
    /// Panics when the ring size is zero or no consumers are given.
    pub fn new(
        options: ConsumerDispatcherOptions,
        consumers: Vec<Consumer>,
        inspector: Inspector,
    ) -> Self {
        assert!(options.size > 0, "dispatcher ring size must be non-zero");
        assert!(!consumers.is_empty(), "dispatcher requires at least one consumer");

        let num_stages = consumers.len() + 1;
        let shared = Arc::new(Shared {
            slots: (0..options.size).map(|_| Mutex::new(None)).collect(),
            cursors: (0..num_stages).map(|_| AtomicU64::new(0)).collect(),
            published: AtomicU64::new(0),
            producer: Mutex::new(ProducerState { next_seq: 0 }),
            work_available: Condvar::new(),
            accepting: AtomicBool::new(true),
            last_result: Mutex::new(CompletionResult::normal()),
            options,
        });

        let mut workers = Vec::with_capacity(num_stages);
        for (position, consumer) in consumers.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("{}-consumer-{position}", shared.options.name))
                .spawn(move || run_consumer(shared, position, consumer))
                .expect("failed to spawn dispatcher consumer thread");
            workers.push(handle);
        }
        {
            let shared_for_worker = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("{}-inspector", shared.options.name))
                .spawn(move || run_inspector(shared_for_worker, inspector))
                .expect("failed to spawn dispatcher inspector thread");
            workers.push(handle);
        }

        debug!(
            dispatcher = %shared.options.name,
            size = shared.options.size,
            stages = num_stages,
            "dispatcher started"
        );

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Submit an input; fire-and-forget.
    pub fn process_element(&self, input: ConsumerInput) -> Result<ElementId, DispatcherError> {
        self.submit(input, None)
    }

    /// Submit an input with a completion handler.
    ///
    /// The handler is invoked exactly once, after the inspector has run, with
    /// the assigned element id and the completion result.
    pub fn process_element_with_completion(
        &self,
        input: ConsumerInput,
        completion: CompletionHandler,
    ) -> Result<ElementId, DispatcherError> {
        self.submit(input, Some(completion))
    }

    fn submit(
        &self,
        mut input: ConsumerInput,
        completion: Option<CompletionHandler>,
    ) -> Result<ElementId, DispatcherError> {
        let shared = &self.shared;
        if input.is_empty() {
            return Err(DispatcherError::EmptyInput(shared.options.name.clone()));
        }

        let mut producer = shared.producer.lock();
        loop {
            if !shared.accepting.load(Ordering::Acquire) {
                return Err(DispatcherError::ShutDown(shared.options.name.clone()));
            }

            let seq = producer.next_seq;
            let released = shared.inspector_cursor().load(Ordering::Acquire);
            if seq - released < shared.capacity() {
                let id = seq + 1;
                input.set_element_id(id);
                let slot = seq as usize % shared.options.size;
                *shared.slots[slot].lock() = Some(ElementState {
                    input,
                    terminal: None,
                    completion,
                });
                producer.next_seq = seq + 1;
                shared.published.store(seq + 1, Ordering::Release);
                shared.work_available.notify_all();
                return Ok(id);
            }

            if shared.options.should_abort_when_full {
                return Err(DispatcherError::Full(shared.options.name.clone()));
            }

            trace!(
                dispatcher = %shared.options.name,
                "ring full, blocking submission until a slot is released"
            );
            shared.work_available.wait(&mut producer);
        }
    }

    /// Number of elements currently inside the ring.
    pub fn num_active_elements(&self) -> u64 {
        let published = self.shared.published.load(Ordering::Acquire);
        let released = self.shared.inspector_cursor().load(Ordering::Acquire);
        published - released
    }

    /// Total number of elements ever submitted.
    pub fn num_total_elements(&self) -> u64 {
        self.shared.published.load(Ordering::Acquire)
    }

    /// Dispatcher name.
    pub fn name(&self) -> &str {
        &self.shared.options.name
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.shared.options.size
    }

    /// Whether the dispatcher still accepts submissions.
    pub fn is_running(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting submissions, drain in-flight elements through all
    /// stages and the inspector, then join the workers. Idempotent.
    pub fn shutdown(&self) {
        {
            let _guard = self.shared.producer.lock();
            self.shared.accepting.store(false, Ordering::Release);
            self.shared.work_available.notify_all();
        }
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
    }
}

impl Drop for ConsumerDispatcher {
    fn drop(&mut self) {
        self.shutdown();
        debug!(dispatcher = %self.shared.options.name, "dispatcher stopped");
    }
}

/// Wait until this stage's cursor is behind its upstream, or until shutdown
/// has drained everything. Returns `None` on exit, otherwise the sequence to
/// process.
fn next_sequence(shared: &Shared, position: usize) -> Option<u64> {
    let cursor = &shared.cursors[position];
    loop {
        let seq = cursor.load(Ordering::Acquire);
        let ready = if position == 0 {
            shared.published.load(Ordering::Acquire)
        } else {
            shared.cursors[position - 1].load(Ordering::Acquire)
        };
        if seq < ready {
            return Some(seq);
        }

        let mut guard = shared.producer.lock();
        // Re-check under the lock so a publish between the check above and
        // the wait below cannot be missed.
        let ready = if position == 0 {
            shared.published.load(Ordering::Acquire)
        } else {
            shared.cursors[position - 1].load(Ordering::Acquire)
        };
        if seq < ready {
            continue;
        }
        if !shared.accepting.load(Ordering::Acquire)
            && seq == shared.published.load(Ordering::Acquire)
        {
            return None;
        }
        shared.work_available.wait(&mut guard);
    }
}

fn advance(shared: &Shared, position: usize, seq: u64) {
    shared.cursors[position].store(seq + 1, Ordering::Release);
    let _guard = shared.producer.lock();
    shared.work_available.notify_all();
}

fn run_consumer(shared: Arc<Shared>, position: usize, mut consumer: Consumer) {
    while let Some(seq) = next_sequence(&shared, position) {
        {
            let slot = seq as usize % shared.options.size;
            let mut slot = shared.slots[slot].lock();
            let state = slot.as_mut().expect("stage sees a claimed slot");

            if state.terminal.is_none() {
                let outcome = catch_unwind(AssertUnwindSafe(|| consumer(&mut state.input)));
                match outcome {
                    Ok(ConsumerOutcome::Continue) => {}
                    Ok(ConsumerOutcome::Complete) => {
                        state.terminal = Some(CompletionResult::completed_at(position));
                    }
                    Ok(ConsumerOutcome::Abort(reason)) => {
                        debug!(
                            dispatcher = %shared.options.name,
                            element_id = state.input.element_id(),
                            position,
                            %reason,
                            "consumer aborted element"
                        );
                        state.terminal = Some(CompletionResult::aborted_at(position, reason));
                    }
                    Err(_) => {
                        error!(
                            dispatcher = %shared.options.name,
                            element_id = state.input.element_id(),
                            position,
                            "consumer panicked; aborting element"
                        );
                        state.terminal =
                            Some(CompletionResult::aborted_at(position, AbortReason::ConsumerPanicked));
                    }
                }
            }
        }
        advance(&shared, position, seq);
    }
}

fn run_inspector(shared: Arc<Shared>, mut inspector: Inspector) {
    let position = shared.cursors.len() - 1;
    while let Some(seq) = next_sequence(&shared, position) {
        let slot = seq as usize % shared.options.size;
        let state = shared.slots[slot]
            .lock()
            .take()
            .expect("inspector sees a claimed slot");

        let result = state.terminal.unwrap_or_else(CompletionResult::normal);
        inspector(&state.input, &result);
        if let Some(completion) = state.completion {
            completion(state.input.element_id(), &result);
        }
        *shared.last_result.lock() = result;

        let id = seq + 1;
        let interval = shared.options.element_trace_interval.max(1);
        if id % interval == 0 {
            let published = shared.published.load(Ordering::Acquire);
            debug!(
                dispatcher = %shared.options.name,
                element_id = id,
                active = published - id,
                total = published,
                last = %result,
                "dispatcher progress"
            );
        }

        advance(&shared, position, seq);
    }
}
