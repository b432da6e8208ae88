//! # Game Input
//!
//! Inputs are opaque, type-tagged payloads fed in by the transport layer.
//! The engine routes them by runtime type to systems that declared the
//! input capabilities.
//!
//! ```text
//! network thread ──InputSender──> [crossbeam queue] ──drain──> update(inputs)
//!                                   FIFO across ticks
//! ```

use std::any::{Any, TypeId};
use std::fmt;

use crossbeam_channel::{Sender, TrySendError};

use crate::error::{EngineError, EngineResult};

/// An external input event.
///
/// Implemented for every `Send + Sync + Debug + 'static` type.
pub trait GameInput: Any + Send + Sync + fmt::Debug {
    /// Upcast used for routing and downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Type name of the input.
    fn input_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + fmt::Debug> GameInput for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn input_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl dyn GameInput {
    /// Runtime type of the payload.
    #[must_use]
    pub fn input_type(&self) -> TypeId {
        self.as_any().type_id()
    }

    /// Returns true if the payload is a `T`.
    #[must_use]
    pub fn is<T: GameInput>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrows the payload as a `T`.
    #[must_use]
    pub fn downcast_ref<T: GameInput>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Owned input as stored in the queue.
pub type BoxedInput = Box<dyn GameInput>;

/// Boxes an input for [`crate::Engine::update`].
#[must_use]
pub fn boxed<I: GameInput>(input: I) -> BoxedInput {
    Box::new(input)
}

/// Cloneable handle for queuing inputs from other threads.
#[derive(Clone)]
pub struct InputSender {
    sender: Sender<BoxedInput>,
    capacity: Option<usize>,
}

impl InputSender {
    pub(crate) fn new(sender: Sender<BoxedInput>, capacity: Option<usize>) -> Self {
        Self { sender, capacity }
    }

    /// Queues an input for the next update.
    ///
    /// # Errors
    ///
    /// [`EngineError::InputQueueFull`] if the queue is bounded and full,
    /// [`EngineError::InputQueueClosed`] if the engine is gone.
    pub fn send<I: GameInput>(&self, input: I) -> EngineResult<()> {
        self.send_boxed(Box::new(input))
    }

    /// Queues an already boxed input.
    ///
    /// # Errors
    ///
    /// Same as [`InputSender::send`].
    pub fn send_boxed(&self, input: BoxedInput) -> EngineResult<()> {
        self.sender.try_send(input).map_err(|err| match err {
            TrySendError::Full(_) => EngineError::InputQueueFull {
                capacity: self.capacity.unwrap_or_default(),
            },
            TrySendError::Disconnected(_) => EngineError::InputQueueClosed,
        })
    }

    /// Number of inputs waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.sender.len()
    }
}

impl fmt::Debug for InputSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSender")
            .field("pending", &self.sender.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
