//! # Event Notifier
//!
//! One-shot notifications between systems and the host.
//!
//! ## Flush horizon
//!
//! ```text
//! submit(a) submit(b)           submit(c) (from a callback)
//!      │        │                    │
//!      ▼        ▼                    ▼
//! ┌─────────────────┐   dispatch   ┌─────────────────┐
//! │ pending: [a, b] │ ───────────> │ pending: [c]    │   c waits for the
//! └─────────────────┘  delivers    └─────────────────┘   NEXT dispatch
//!                      a, b once
//! ```
//!
//! A dispatch takes exactly the events that were pending when it started.
//! Anything submitted while callbacks run, from any thread, lands in the
//! next flush. Only one dispatch may run at a time per notifier.
//!
//! The pending queue is a crossbeam channel, so submitters never block on
//! the flusher.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::error::EventError;

/// Anything that can be submitted to an [`EventNotifier`].
///
/// Implemented for every `Send + Sync + Debug + 'static` type.
pub trait Event: Any + Send + Sync + fmt::Debug {
    /// Upcast used to route the event by its runtime type.
    fn as_any(&self) -> &dyn Any;

    /// Type name of the event.
    fn event_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + fmt::Debug> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn event_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

type Handler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Cheap, cloneable handle for submitting events from any thread.
#[derive(Clone)]
pub struct EventSubmitter {
    sender: Sender<Box<dyn Event>>,
}

impl EventSubmitter {
    /// Queues an event for the next dispatch.
    pub fn submit<E: Event>(&self, event: E) {
        // The receiver lives as long as the notifier; a send can only fail
        // after the notifier is gone, and then nobody would observe it.
        let _ = self.sender.send(Box::new(event));
    }
}

impl fmt::Debug for EventSubmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubmitter")
            .field("pending", &self.sender.len())
            .finish()
    }
}

/// Mailbox of typed events with per-type callback lists.
pub struct EventNotifier {
    sender: Sender<Box<dyn Event>>,
    receiver: Receiver<Box<dyn Event>>,
    handlers: RwLock<HashMap<TypeId, Vec<Handler>>>,
    /// Held for the duration of a dispatch.
    flush_guard: Mutex<()>,
}

impl EventNotifier {
    /// Creates an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            handlers: RwLock::new(HashMap::new()),
            flush_guard: Mutex::new(()),
        }
    }

    /// Creates a submitter handle (clone for multiple producers).
    #[must_use]
    pub fn submitter(&self) -> EventSubmitter {
        EventSubmitter {
            sender: self.sender.clone(),
        }
    }

    /// Queues an event for the next dispatch.
    pub fn submit<E: Event>(&self, event: E) {
        let _ = self.sender.send(Box::new(event));
    }

    /// Registers a callback for events of type `E`.
    ///
    /// Callbacks run in registration order.
    pub fn on<E: Event>(&self, handler: impl Fn(&E) + Send + Sync + 'static) {
        let erased: Handler = Arc::new(move |event: &dyn Any| {
            if let Some(event) = event.downcast_ref::<E>() {
                handler(event);
            }
        });
        self.handlers
            .write()
            .entry(TypeId::of::<E>())
            .or_default()
            .push(erased);
    }

    /// Number of callbacks registered for `E`.
    #[must_use]
    pub fn handler_count<E: Event>(&self) -> usize {
        self.handlers
            .read()
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }

    /// Number of events waiting for the next dispatch.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Delivers every event that was pending when the call started, in
    /// submission order, to all callbacks registered for its runtime type.
    ///
    /// Returns the number of events taken from the queue.
    ///
    /// # Errors
    ///
    /// [`EventError::DispatchInProgress`] if another dispatch on this
    /// notifier has not finished (including a dispatch started from one of
    /// its own callbacks).
    pub fn dispatch_events(&self) -> Result<usize, EventError> {
        let Some(_flush) = self.flush_guard.try_lock() else {
            return Err(EventError::DispatchInProgress);
        };

        // Swap: take the events queued so far; later submissions stay queued.
        let horizon = self.receiver.len();
        let batch: Vec<Box<dyn Event>> = self.receiver.try_iter().take(horizon).collect();

        for event in &batch {
            let event: &dyn Event = &**event;
            let handlers = self
                .handlers
                .read()
                .get(&event.as_any().type_id())
                .cloned();

            let Some(handlers) = handlers else {
                tracing::trace!(event = event.event_name(), "event has no subscribers");
                continue;
            };
            for handler in &handlers {
                handler(event.as_any());
            }
        }

        if !batch.is_empty() {
            tracing::trace!(delivered = batch.len(), "dispatched events");
        }
        Ok(batch.len())
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventNotifier")
            .field("pending", &self.receiver.len())
            .field("event_types", &self.handlers.read().len())
            .finish_non_exhaustive()
    }
}
