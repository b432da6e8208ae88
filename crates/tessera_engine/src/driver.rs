//! # Tick Driver
//!
//! Awaitable front end for an [`Engine`].
//!
//! A tick is CPU-bound and runs on rayon workers, so the driver moves it
//! onto tokio's blocking pool and hands back a future. The engine sits
//! behind a `tokio::sync::Mutex`: a second tick waits until the first has
//! committed, so ticks never overlap.
//!
//! ```rust,ignore
//! let driver = TickDriver::new(engine, runtime.handle().clone());
//! runtime.block_on(async {
//!     driver.synchronize_state().await?;
//!     let stats = driver.update(inputs).await?;
//!     Ok::<_, EngineError>(stats)
//! })?;
//! ```
//!
//! A tick cannot be cancelled once spawned; dropping the future lets it
//! run to completion.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::input::BoxedInput;
use crate::stats::TickStats;

/// Runs engine ticks on a tokio runtime.
#[derive(Clone)]
pub struct TickDriver {
    engine: Arc<Mutex<Engine>>,
    runtime: Handle,
}

impl TickDriver {
    /// Wraps an engine; ticks are spawned on `runtime`.
    #[must_use]
    pub fn new(engine: Engine, runtime: Handle) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            runtime,
        }
    }

    /// Spawns admission for the current tick.
    #[must_use = "the tick runs regardless; await the handle to observe its result"]
    pub fn spawn_synchronize_state(&self) -> JoinHandle<EngineResult<()>> {
        let engine = Arc::clone(&self.engine);
        self.runtime
            .spawn_blocking(move || engine.blocking_lock().synchronize_state())
    }

    /// Spawns one full tick.
    #[must_use = "the tick runs regardless; await the handle to observe its result"]
    pub fn spawn_update(&self, inputs: Vec<BoxedInput>) -> JoinHandle<EngineResult<TickStats>> {
        let engine = Arc::clone(&self.engine);
        self.runtime
            .spawn_blocking(move || engine.blocking_lock().update(inputs))
    }

    /// Runs admission for the current tick and waits for it.
    ///
    /// # Errors
    ///
    /// The engine's error, or [`EngineError::TickAborted`] if a system
    /// panicked.
    pub async fn synchronize_state(&self) -> EngineResult<()> {
        join(self.spawn_synchronize_state()).await
    }

    /// Runs one full tick and waits for it.
    ///
    /// # Errors
    ///
    /// The engine's error, or [`EngineError::TickAborted`] if a system
    /// panicked.
    pub async fn update(&self, inputs: Vec<BoxedInput>) -> EngineResult<TickStats> {
        join(self.spawn_update(inputs)).await
    }

    /// Waits for the running tick, if any, and locks the engine.
    pub async fn lock(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().await
    }

    /// Unwraps the engine once no other driver clone or tick holds it.
    ///
    /// # Errors
    ///
    /// Returns the driver unchanged while it is still shared.
    pub fn into_engine(self) -> Result<Engine, Self> {
        let runtime = self.runtime;
        Arc::try_unwrap(self.engine)
            .map(Mutex::into_inner)
            .map_err(|engine| Self { engine, runtime })
    }
}

impl std::fmt::Debug for TickDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickDriver")
            .field("shared", &Arc::strong_count(&self.engine))
            .finish_non_exhaustive()
    }
}

async fn join<T>(handle: JoinHandle<EngineResult<T>>) -> EngineResult<T> {
    match handle.await {
        Ok(result) => result,
        Err(err) => Err(EngineError::TickAborted {
            reason: err.to_string(),
        }),
    }
}
