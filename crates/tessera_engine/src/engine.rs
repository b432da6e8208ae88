//! # Engine
//!
//! Drives the world through one fixed pipeline per tick.
//!
//! ## Tick pipeline
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │ 1. Admission        Added -> Active (OnAdded)                     │
//! │                     Removed: OnRemoved                            │
//! │ 2. GlobalPreUpdate  once per system, on the global entity         │
//! │ 3. Update           per active entity: OnModified, then OnUpdate  │
//! │ 4. Input            per input (FIFO): OnInput, then OnGlobalInput │
//! │ 5. GlobalPostUpdate once per system, on the global entity         │
//! │ 6. Commit           drop Removed, previous := current, flags      │
//! │                     cleared, deferred commands applied            │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every phase walks the execution plan: groups in parallel, levels of a
//! group in sequence, systems of a level in parallel. A system only sees
//! entities passing its filter and only receives triggers named in its
//! capabilities.
//!
//! ## Failure
//!
//! A failing callback aborts the tick before Commit. The tick counter does
//! not advance and `previous` still holds the last committed state; the
//! caller may run the tick again.

use std::any::TypeId;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver};
use parking_lot::{Mutex, RwLockWriteGuard};

use tessera_core::{
    ComponentId, ComponentRegistry, Entity, EntityHandle, EntityId, EventNotifier, EventSubmitter,
    Filter, IdGenerator,
};

use crate::config::EngineConfig;
use crate::context::{Command, TickContext};
use crate::error::{EngineError, EngineResult, SystemError, SystemResult};
use crate::input::{BoxedInput, GameInput, InputSender};
use crate::scheduler::ExecutionPlan;
use crate::snapshot::{EntitySnapshot, Snapshot};
use crate::stats::{TickStats, TimingStats};
use crate::system::{Capabilities, System, Trigger};

/// Submitted when an entity is admitted into the active set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityAddedEvent {
    /// Admitted entity.
    pub entity: EntityId,
    /// Its pretty name.
    pub name: String,
}

/// Submitted when an entity leaves the active set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityRemovedEvent {
    /// Evicted entity.
    pub entity: EntityId,
    /// Its pretty name.
    pub name: String,
}

/// A system plus everything queried from it at registration.
struct RegisteredSystem {
    system: Box<dyn System>,
    name: String,
    filter: Filter,
    capabilities: Capabilities,
    input_types: Vec<TypeId>,
}

impl RegisteredSystem {
    fn new(system: Box<dyn System>) -> Self {
        Self {
            name: system.name().to_owned(),
            filter: system.filter(),
            capabilities: system.capabilities(),
            input_types: system.input_types(),
            system,
        }
    }

    fn get(&self) -> &dyn System {
        &*self.system
    }

    fn accepts(&self, input: &dyn GameInput) -> bool {
        self.input_types.is_empty() || self.input_types.contains(&input.input_type())
    }

    fn failed(
        &self,
        trigger: Trigger,
        entity: Option<EntityId>,
    ) -> impl FnOnce(SystemError) -> EngineError + '_ {
        move |source| EngineError::SystemFailed {
            system: self.name.clone(),
            trigger,
            entity,
            source,
        }
    }
}

/// Invocation counters shared by the workers of one phase.
#[derive(Default)]
struct Counters([AtomicU64; 8]);

impl Counters {
    fn bump(&self, trigger: Trigger) {
        self.0[trigger.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn fold_into(&self, stats: &mut TickStats) {
        for (total, counter) in stats.invocations.iter_mut().zip(&self.0) {
            *total += counter.load(Ordering::Relaxed);
        }
    }
}

/// Builds an [`Engine`], fresh or from a [`Snapshot`].
pub struct EngineBuilder {
    registry: ComponentRegistry,
    systems: Vec<Box<dyn System>>,
    config: EngineConfig,
    snapshot: Option<Snapshot>,
}

impl EngineBuilder {
    /// Starts an empty engine over `registry`.
    #[must_use]
    pub fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry,
            systems: Vec::new(),
            config: EngineConfig::default(),
            snapshot: None,
        }
    }

    /// Starts an engine that resumes from `snapshot`.
    ///
    /// The same systems must be registered, in the same order, before
    /// [`EngineBuilder::build`].
    #[must_use]
    pub fn from_snapshot(registry: ComponentRegistry, snapshot: Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            ..Self::new(registry)
        }
    }

    /// Registers a system.
    #[must_use]
    pub fn with_system(self, system: impl System) -> Self {
        self.with_boxed_system(Box::new(system))
    }

    /// Registers an already boxed system.
    #[must_use]
    pub fn with_boxed_system(mut self, system: Box<dyn System>) -> Self {
        self.systems.push(system);
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Computes the execution plan and builds the engine.
    ///
    /// # Errors
    ///
    /// - [`EngineError::OrderingCycle`] if the systems' ordering claims
    ///   contradict each other
    /// - [`EngineError::Config`] for an invalid configuration
    /// - [`EngineError::SnapshotMismatch`] / [`EngineError::Core`] if the
    ///   snapshot cannot be restored
    pub fn build(self) -> EngineResult<Engine> {
        self.config.validate()?;

        let systems: Vec<RegisteredSystem> = self.systems.into_iter().map(RegisteredSystem::new).collect();
        let plan = {
            let refs: Vec<&dyn System> = systems.iter().map(RegisteredSystem::get).collect();
            ExecutionPlan::build(&refs)?
        };
        tracing::debug!(
            systems = systems.len(),
            groups = ?describe_plan(&plan, &systems),
            "computed execution plan"
        );

        let pool = match self.config.worker_threads {
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|index| format!("tessera-worker-{index}"))
                    .build()
                    .map_err(|err| EngineError::Config(format!("worker pool: {err}")))?,
            ),
            None => None,
        };

        let (input_tx, input_rx) = match self.config.input_queue_capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let inputs = InputSender::new(input_tx, self.config.input_queue_capacity);

        let notifier = EventNotifier::new();
        let submitter = notifier.submitter();

        let state = match self.snapshot {
            Some(snapshot) => restore_state(&self.registry, &systems, snapshot)?,
            None => RestoredState::fresh(),
        };

        Ok(Engine {
            registry: self.registry,
            systems,
            plan,
            pool,
            config: self.config,
            ids: IdGenerator::starting_at(state.next_entity_id.max(1)),
            global: EntityHandle::new(state.global),
            added: state.added.into_iter().map(EntityHandle::new).collect(),
            active: state.active.into_iter().map(EntityHandle::new).collect(),
            removed: state.removed.into_iter().map(EntityHandle::new).collect(),
            evictions_notified: state.evictions_notified,
            admission_done: state.admission_done,
            tick: state.tick,
            notifier,
            submitter,
            inputs,
            input_rx,
            unrouted: Vec::new(),
            commands: Mutex::new(Vec::new()),
            contention: AtomicU64::new(0),
            pending: TickStats::default(),
            tick_started: None,
            timing: TimingStats::default(),
        })
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("systems", &self.systems.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("config", &self.config)
            .field("from_snapshot", &self.snapshot.is_some())
            .finish_non_exhaustive()
    }
}

struct RestoredState {
    tick: u64,
    next_entity_id: u64,
    admission_done: bool,
    evictions_notified: usize,
    global: Entity,
    active: Vec<Entity>,
    added: Vec<Entity>,
    removed: Vec<Entity>,
}

impl RestoredState {
    fn fresh() -> Self {
        Self {
            tick: 0,
            next_entity_id: 1,
            admission_done: false,
            evictions_notified: 0,
            global: Entity::new(EntityId::GLOBAL, "global"),
            active: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

fn restore_state(
    registry: &ComponentRegistry,
    systems: &[RegisteredSystem],
    snapshot: Snapshot,
) -> EngineResult<RestoredState> {
    let names: Vec<&str> = systems.iter().map(|s| s.name.as_str()).collect();
    if snapshot.systems != names {
        return Err(EngineError::SnapshotMismatch {
            reason: format!("snapshot systems {:?}, engine systems {names:?}", snapshot.systems),
        });
    }
    if snapshot.global.id != EntityId::GLOBAL {
        return Err(EngineError::SnapshotMismatch {
            reason: format!("global entity has id {}", snapshot.global.id),
        });
    }
    if snapshot.evictions_notified > snapshot.removed.len() {
        return Err(EngineError::SnapshotMismatch {
            reason: format!(
                "{} evictions notified but only {} removed entities",
                snapshot.evictions_notified,
                snapshot.removed.len()
            ),
        });
    }

    let restore_all = |list: &[EntitySnapshot]| -> EngineResult<Vec<Entity>> {
        list.iter().map(|entity| entity.restore(registry)).collect()
    };
    let active = restore_all(snapshot.active.as_slice())?;
    let added = restore_all(snapshot.added.as_slice())?;
    let removed = restore_all(snapshot.removed.as_slice())?;

    let highest = active
        .iter()
        .chain(&added)
        .chain(&removed)
        .map(|entity| entity.id().raw())
        .max()
        .unwrap_or(0);

    tracing::debug!(
        tick = snapshot.tick,
        entities = snapshot.entity_count(),
        "restored engine state from snapshot"
    );

    Ok(RestoredState {
        tick: snapshot.tick,
        next_entity_id: snapshot.next_entity_id.max(highest + 1),
        admission_done: snapshot.admission_done,
        evictions_notified: snapshot.evictions_notified,
        global: snapshot.global.restore(registry)?,
        active,
        added,
        removed,
    })
}

fn describe_plan(plan: &ExecutionPlan, systems: &[RegisteredSystem]) -> Vec<Vec<String>> {
    plan.groups()
        .iter()
        .map(|group| group.systems().map(|index| systems[index].name.clone()).collect())
        .collect()
}

/// The simulation engine.
///
/// Owns the entity sets, the systems and their execution plan.
pub struct Engine {
    registry: ComponentRegistry,
    systems: Vec<RegisteredSystem>,
    plan: ExecutionPlan,
    pool: Option<rayon::ThreadPool>,
    config: EngineConfig,
    ids: IdGenerator,

    global: EntityHandle,
    added: Vec<EntityHandle>,
    active: Vec<EntityHandle>,
    removed: Vec<EntityHandle>,
    /// Leading entries of `removed` that already received OnRemoved.
    evictions_notified: usize,
    admission_done: bool,
    tick: u64,

    notifier: EventNotifier,
    submitter: EventSubmitter,
    inputs: InputSender,
    input_rx: Receiver<BoxedInput>,
    /// Queued inputs of an aborted tick, routed first next time.
    unrouted: Vec<BoxedInput>,
    commands: Mutex<Vec<Command>>,

    /// Write contention observed since the last commit.
    contention: AtomicU64,
    /// Stats of the tick in progress.
    pending: TickStats,
    tick_started: Option<Instant>,
    timing: TimingStats,
}

impl Engine {
    /// Shorthand for [`EngineBuilder::new`].
    #[must_use]
    pub fn builder(registry: ComponentRegistry) -> EngineBuilder {
        EngineBuilder::new(registry)
    }

    // =========================================================================
    // ENTITY SETS
    // =========================================================================

    /// Creates an entity in the Added set. It is admitted by the next
    /// admission phase.
    pub fn create_entity(&mut self, name: impl Into<String>) -> EntityHandle {
        let handle = EntityHandle::new(Entity::new(self.ids.next_id(), name));
        tracing::trace!(entity = %handle.id(), "entity created");
        self.added.push(handle.clone());
        handle
    }

    /// Removes an entity.
    ///
    /// An active entity moves to the Removed set and receives OnRemoved at
    /// the next admission; an entity still waiting for admission is dropped
    /// without any trigger. Removing an entity already pending removal does
    /// nothing.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownEntity`] for the global entity or an id this
    /// engine does not own.
    pub fn remove_entity(&mut self, entity: EntityId) -> EngineResult<()> {
        if let Some(position) = self.active.iter().position(|h| h.id() == entity) {
            let handle = self.active.remove(position);
            self.removed.push(handle);
            return Ok(());
        }
        if let Some(position) = self.added.iter().position(|h| h.id() == entity) {
            self.added.remove(position);
            tracing::trace!(%entity, "entity discarded before admission");
            return Ok(());
        }
        if self.removed.iter().any(|h| h.id() == entity) {
            return Ok(());
        }
        Err(EngineError::UnknownEntity { entity })
    }

    /// Finds an entity in any set, the global entity included.
    #[must_use]
    pub fn entity(&self, entity: EntityId) -> Option<&EntityHandle> {
        if entity == EntityId::GLOBAL {
            return Some(&self.global);
        }
        self.active
            .iter()
            .chain(&self.added)
            .chain(&self.removed)
            .find(|h| h.id() == entity)
    }

    /// The global entity.
    #[must_use]
    pub fn global(&self) -> &EntityHandle {
        &self.global
    }

    /// Entities in the active set, in admission order.
    #[must_use]
    pub fn active(&self) -> &[EntityHandle] {
        &self.active
    }

    /// Entities waiting for admission.
    #[must_use]
    pub fn added(&self) -> &[EntityHandle] {
        &self.added
    }

    /// Entities waiting for eviction.
    #[must_use]
    pub fn removed(&self) -> &[EntityHandle] {
        &self.removed
    }

    // =========================================================================
    // SYSTEMS, EVENTS, INPUTS
    // =========================================================================

    /// The registered system of type `T`.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownSystem`] if none is registered.
    pub fn get_system<T: System>(&self) -> EngineResult<&T> {
        self.systems
            .iter()
            .find_map(|entry| entry.get().as_any().downcast_ref::<T>())
            .ok_or(EngineError::UnknownSystem {
                type_name: std::any::type_name::<T>(),
            })
    }

    /// System names in registration order.
    #[must_use]
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name.as_str()).collect()
    }

    /// The execution plan computed at build time.
    #[must_use]
    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// System names per execution group, each group in level order.
    #[must_use]
    pub fn execution_groups(&self) -> Vec<Vec<&str>> {
        self.plan
            .groups()
            .iter()
            .map(|group| group.systems().map(|i| self.systems[i].name.as_str()).collect())
            .collect()
    }

    /// The engine's notifier, for registering callbacks.
    #[must_use]
    pub fn events(&self) -> &EventNotifier {
        &self.notifier
    }

    /// Delivers events submitted so far.
    ///
    /// # Errors
    ///
    /// [`EngineError::Event`] if a dispatch is already running.
    pub fn dispatch_events(&self) -> EngineResult<usize> {
        Ok(self.notifier.dispatch_events()?)
    }

    /// Handle for queuing inputs from other threads.
    #[must_use]
    pub fn input_sender(&self) -> InputSender {
        self.inputs.clone()
    }

    /// Queues an input for the next update.
    ///
    /// # Errors
    ///
    /// [`EngineError::InputQueueFull`] if the bounded queue is full.
    pub fn queue_input<I: GameInput>(&self, input: I) -> EngineResult<()> {
        self.inputs.send(input)
    }

    // =========================================================================
    // TICK PIPELINE
    // =========================================================================

    /// Number of the next tick to run (ticks committed so far).
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The component registry.
    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Duration statistics over all committed ticks.
    #[must_use]
    pub fn timing(&self) -> &TimingStats {
        &self.timing
    }

    /// Runs admission for the current tick: OnAdded for every entity in the
    /// Added set (which then joins the active set) and OnRemoved for every
    /// entity in the Removed set.
    ///
    /// Calling it again before the tick commits does nothing.
    ///
    /// # Errors
    ///
    /// [`EngineError::SystemFailed`] if a callback fails; nothing moves
    /// between sets in that case and deferred commands issued by the
    /// admission callbacks are dropped.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from a system callback after the same cleanup.
    pub fn synchronize_state(&mut self) -> EngineResult<()> {
        if self.admission_done {
            return Ok(());
        }
        self.tick_started.get_or_insert_with(Instant::now);

        let commands_before = self.commands.lock().len();
        let counters = Counters::default();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_admission(&counters)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.commands.lock().truncate(commands_before);
                return Err(err);
            }
            Err(payload) => {
                self.commands.lock().truncate(commands_before);
                panic::resume_unwind(payload);
            }
        }
        counters.fold_into(&mut self.pending);

        let admitted = std::mem::take(&mut self.added);
        for handle in &admitted {
            self.submitter.submit(EntityAddedEvent {
                entity: handle.id(),
                name: handle.read().pretty_name().to_owned(),
            });
        }
        for handle in &self.removed[self.evictions_notified..] {
            self.submitter.submit(EntityRemovedEvent {
                entity: handle.id(),
                name: handle.read().pretty_name().to_owned(),
            });
        }

        self.pending.admitted += u32::try_from(admitted.len()).unwrap_or(u32::MAX);
        self.pending.evicted +=
            u32::try_from(self.removed.len() - self.evictions_notified).unwrap_or(u32::MAX);
        self.evictions_notified = self.removed.len();
        self.active.extend(admitted);
        self.admission_done = true;
        Ok(())
    }

    /// Runs one full tick and commits it.
    ///
    /// Admission runs first unless [`Engine::synchronize_state`] already
    /// did it for this tick. Inputs queued through [`Engine::queue_input`]
    /// or an [`InputSender`] are routed before `inputs`.
    ///
    /// # Errors
    ///
    /// [`EngineError::SystemFailed`] if a callback fails. The tick is not
    /// committed and the counter does not advance; queued inputs are kept
    /// for the next attempt (`inputs` is not) and deferred commands issued
    /// by the failed pass are dropped.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from a system callback after the same cleanup as
    /// a failure, so the engine can run the tick again.
    pub fn update(&mut self, inputs: Vec<BoxedInput>) -> EngineResult<TickStats> {
        self.synchronize_state()?;

        let mut routed = std::mem::take(&mut self.unrouted);
        routed.extend(self.input_rx.try_iter());
        let queued = routed.len();
        routed.extend(inputs);

        let modified: Vec<BTreeSet<ComponentId>> = self
            .active
            .iter()
            .map(|handle| handle.write().take_modifications())
            .collect();

        let commands_before = self.commands.lock().len();
        let counters = Counters::default();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_tick_body(&routed, &modified, &counters)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.abort_tick(modified, routed, queued, commands_before);
                tracing::warn!(tick = self.tick, error = %err, "tick aborted");
                return Err(err);
            }
            Err(payload) => {
                self.abort_tick(modified, routed, queued, commands_before);
                tracing::warn!(tick = self.tick, "tick aborted by a panicking system");
                panic::resume_unwind(payload);
            }
        }

        let mut stats = std::mem::take(&mut self.pending);
        counters.fold_into(&mut stats);
        stats.tick = self.tick;
        stats.inputs = u32::try_from(routed.len()).unwrap_or(u32::MAX);
        stats.write_contention = self.contention.swap(0, Ordering::Relaxed);

        self.commit();

        let started = self.tick_started.take().unwrap_or_else(Instant::now);
        stats.duration = started.elapsed();
        let budget = Duration::from_millis(self.config.tick_budget_ms);
        if self.config.tick_budget_ms > 0 && stats.duration > budget {
            stats.late = true;
            tracing::warn!(
                tick = stats.tick,
                duration_us = u64::try_from(stats.duration.as_micros()).unwrap_or(u64::MAX),
                budget_ms = self.config.tick_budget_ms,
                "tick over budget"
            );
        }
        self.timing.record(&stats);

        tracing::trace!(
            tick = stats.tick,
            active = self.active.len(),
            invocations = stats.total_invocations(),
            inputs = stats.inputs,
            "tick committed"
        );
        Ok(stats)
    }

    /// OnAdded over the Added set, then OnRemoved over removals not yet
    /// notified.
    fn run_admission(&self, counters: &Counters) -> EngineResult<()> {
        let ctx = self.context();
        self.run_entities(Trigger::Added, &self.added, None, counters, |entry, entity| {
            entry.get().on_added(&ctx, entity)
        })?;
        let evicting = &self.removed[self.evictions_notified..];
        self.run_entities(Trigger::Removed, evicting, None, counters, |entry, entity| {
            entry.get().on_removed(&ctx, entity)
        })
    }

    /// Undoes the side effects of a failed or panicked update pass:
    /// modification sets and queued inputs go back, deferred commands of
    /// the pass are dropped.
    fn abort_tick(
        &mut self,
        modified: Vec<BTreeSet<ComponentId>>,
        mut routed: Vec<BoxedInput>,
        queued: usize,
        commands: usize,
    ) {
        self.requeue_modifications(modified);
        routed.truncate(queued);
        self.unrouted = routed;
        self.commands.lock().truncate(commands);
    }

    fn run_tick_body(
        &self,
        inputs: &[BoxedInput],
        modified: &[BTreeSet<ComponentId>],
        counters: &Counters,
    ) -> EngineResult<()> {
        let ctx = self.context();

        self.run_global(Trigger::GlobalPreUpdate, None, counters, |entry, global| {
            entry.get().on_global_pre_update(&ctx, global)
        })?;

        self.run_update(&ctx, modified, counters)?;

        for input in inputs {
            let input: &dyn GameInput = &**input;
            self.run_entities(Trigger::Input, &self.active, Some(input), counters, |entry, entity| {
                entry.get().on_input(&ctx, input, entity)
            })?;
            self.run_global(Trigger::GlobalInput, Some(input), counters, |entry, global| {
                entry.get().on_global_input(&ctx, input, global)
            })?;
        }

        self.run_global(Trigger::GlobalPostUpdate, None, counters, |entry, global| {
            entry.get().on_global_post_update(&ctx, global)
        })
    }

    /// Update pass: OnModified (when a filtered component changed) followed
    /// by OnUpdate, per active entity.
    fn run_update(
        &self,
        ctx: &TickContext<'_>,
        modified: &[BTreeSet<ComponentId>],
        counters: &Counters,
    ) -> EngineResult<()> {
        let mask = Capabilities::ON_MODIFIED | Capabilities::ON_UPDATE;
        self.run_plan(mask, None, |entry| {
            let wants_modified = entry.capabilities.contains(Capabilities::ON_MODIFIED);
            let wants_update = entry.capabilities.contains(Capabilities::ON_UPDATE);

            for (handle, changed) in self.active.iter().zip(modified) {
                let mut entity = self.lock(handle, &entry.name);
                if !entry.filter.matches(&entity) {
                    continue;
                }
                if wants_modified && entry.filter.intersects(changed) {
                    entry
                        .get()
                        .on_modified(ctx, &mut entity, changed)
                        .map_err(entry.failed(Trigger::Modified, Some(handle.id())))?;
                    counters.bump(Trigger::Modified);
                }
                if wants_update {
                    entry
                        .get()
                        .on_update(ctx, &mut entity)
                        .map_err(entry.failed(Trigger::Update, Some(handle.id())))?;
                    counters.bump(Trigger::Update);
                }
            }
            Ok(())
        })
    }

    /// Runs a per-entity trigger over `entities` for every capable system.
    fn run_entities<F>(
        &self,
        trigger: Trigger,
        entities: &[EntityHandle],
        input: Option<&dyn GameInput>,
        counters: &Counters,
        call: F,
    ) -> EngineResult<()>
    where
        F: Fn(&RegisteredSystem, &mut Entity) -> SystemResult + Sync,
    {
        if entities.is_empty() {
            return Ok(());
        }
        self.run_plan(trigger.capability(), input, |entry| {
            for handle in entities {
                let mut entity = self.lock(handle, &entry.name);
                if !entry.filter.matches(&entity) {
                    continue;
                }
                call(entry, &mut entity).map_err(entry.failed(trigger, Some(handle.id())))?;
                counters.bump(trigger);
            }
            Ok(())
        })
    }

    /// Runs a global trigger once for every capable system.
    fn run_global<F>(
        &self,
        trigger: Trigger,
        input: Option<&dyn GameInput>,
        counters: &Counters,
        call: F,
    ) -> EngineResult<()>
    where
        F: Fn(&RegisteredSystem, &mut Entity) -> SystemResult + Sync,
    {
        self.run_plan(trigger.capability(), input, |entry| {
            let mut global = self.lock(&self.global, &entry.name);
            call(entry, &mut global).map_err(entry.failed(trigger, None))?;
            counters.bump(trigger);
            Ok(())
        })
    }

    /// Walks the execution plan, running `work` for every system that has
    /// a capability in `mask` (and accepts `input`, if given).
    fn run_plan<F>(&self, mask: Capabilities, input: Option<&dyn GameInput>, work: F) -> EngineResult<()>
    where
        F: Fn(&RegisteredSystem) -> EngineResult<()> + Sync,
    {
        let selected = |entry: &RegisteredSystem| {
            entry.capabilities.intersects(mask) && input.map_or(true, |input| entry.accepts(input))
        };
        if !self.systems.iter().any(|entry| selected(entry)) {
            return Ok(());
        }

        let run = || {
            self.plan.run(|index| {
                let entry = &self.systems[index];
                if selected(entry) {
                    work(entry).map(|()| 1)
                } else {
                    Ok(0)
                }
            })
        };
        let invoked = match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        };
        invoked.map(|_| ())
    }

    /// Write access to an entity, counting contention when enabled.
    fn lock<'h>(&self, handle: &'h EntityHandle, system: &str) -> RwLockWriteGuard<'h, Entity> {
        if self.config.detect_write_contention {
            if let Some(guard) = handle.try_write() {
                return guard;
            }
            self.contention.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(entity = %handle.id(), system, "write contention between concurrent systems");
        }
        handle.write()
    }

    fn context(&self) -> TickContext<'_> {
        TickContext::new(self.tick, &self.registry, &self.submitter, &self.ids, &self.commands)
    }

    /// Puts modification sets drained by an aborted update back.
    fn requeue_modifications(&self, modified: Vec<BTreeSet<ComponentId>>) {
        for (handle, mut changed) in self.active.iter().zip(modified) {
            let mut entity = handle.write();
            changed.extend(entity.pending_modifications().iter().copied());
            entity.restore_modifications(changed);
        }
    }

    /// Commit: drops evicted entities, swaps buffers, applies deferred
    /// commands and advances the tick counter.
    fn commit(&mut self) {
        self.removed = self.removed.split_off(self.evictions_notified);
        self.evictions_notified = 0;

        {
            let mut global = self.global.write();
            global.commit();
            global.take_modifications();
        }
        // entities removed after this tick's admission are evicted next tick
        for handle in self.active.iter().chain(&self.removed) {
            handle.write().commit();
        }

        let commands = std::mem::take(&mut *self.commands.lock());
        for command in commands {
            match command {
                Command::Create(handle) => self.added.push(handle),
                Command::Remove(entity) => {
                    if let Err(err) = self.remove_entity(entity) {
                        tracing::warn!(%entity, error = %err, "deferred removal ignored");
                    }
                }
            }
        }

        self.tick += 1;
        self.admission_done = false;
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Captures the engine state. Call between ticks.
    #[must_use]
    pub fn take_snapshot(&self) -> Snapshot {
        let capture = |handles: &[EntityHandle]| -> Vec<EntitySnapshot> {
            handles
                .iter()
                .map(|handle| EntitySnapshot::capture(&handle.read(), &self.registry))
                .collect()
        };

        Snapshot {
            tick: self.tick,
            next_entity_id: self.ids.peek(),
            admission_done: self.admission_done,
            evictions_notified: self.evictions_notified,
            global: EntitySnapshot::capture(&self.global.read(), &self.registry),
            active: capture(self.active.as_slice()),
            added: capture(self.added.as_slice()),
            removed: capture(self.removed.as_slice()),
            systems: self.system_names().into_iter().map(str::to_owned).collect(),
        }
    }

    /// Structural hash over the entity and component state.
    ///
    /// Two engines with equal state return equal hashes, regardless of the
    /// component ids their registries assigned.
    #[must_use]
    pub fn verification_hash(&self) -> u64 {
        self.take_snapshot().verification_hash()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tick", &self.tick)
            .field("systems", &self.system_names())
            .field("active", &self.active.len())
            .field("added", &self.added.len())
            .field("removed", &self.removed.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::boxed;
    use crate::system::SystemOrdering;
    use bytemuck::{Pod, Zeroable};
    use std::sync::Arc;
    use tessera_core::{Component, DataAccessor};

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
    #[repr(C)]
    struct Health {
        value: i32,
    }

    impl Component for Health {
        fn name() -> &'static str {
            "Health"
        }
    }

    /// Counts updates into the entity's own Health.
    struct Regen {
        health: DataAccessor<Health>,
    }

    impl System for Regen {
        fn filter(&self) -> Filter {
            Filter::empty().with(self.health)
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::ON_UPDATE
        }

        fn on_update(&self, _ctx: &TickContext<'_>, entity: &mut Entity) -> SystemResult {
            entity.modify(self.health)?.value += 1;
            Ok(())
        }
    }

    /// Spawns one child per tick from the global entity, removes it next tick.
    struct Spawner {
        spawned: Mutex<Vec<EntityId>>,
    }

    impl System for Spawner {
        fn capabilities(&self) -> Capabilities {
            Capabilities::ON_GLOBAL_POST_UPDATE
        }

        fn on_global_post_update(&self, ctx: &TickContext<'_>, _global: &mut Entity) -> SystemResult {
            let mut spawned = self.spawned.lock();
            if let Some(previous) = spawned.pop() {
                ctx.remove_entity(previous);
            }
            spawned.push(ctx.create_entity(format!("child-{}", ctx.tick())).id());
            Ok(())
        }
    }

    struct Broken;

    impl System for Broken {
        fn capabilities(&self) -> Capabilities {
            Capabilities::ON_GLOBAL_PRE_UPDATE
        }

        fn on_global_pre_update(&self, _ctx: &TickContext<'_>, _global: &mut Entity) -> SystemResult {
            Err(SystemError::message("broken on purpose"))
        }
    }

    struct First;

    impl System for First {
        fn capabilities(&self) -> Capabilities {
            Capabilities::NONE
        }

        fn ordering(&self, other: &dyn System) -> SystemOrdering {
            if crate::system::is_system::<Broken>(other) {
                SystemOrdering::Before
            } else {
                SystemOrdering::Concurrent
            }
        }
    }

    /// Holds the entity lock for a while in the triggers it declares.
    struct Hog {
        name: &'static str,
        capabilities: Capabilities,
    }

    impl Hog {
        fn hold(entity: &mut Entity) {
            std::thread::sleep(Duration::from_millis(40));
            entity.set_pretty_name("held");
        }
    }

    impl System for Hog {
        fn name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> Capabilities {
            self.capabilities
        }

        fn on_added(&self, _ctx: &TickContext<'_>, entity: &mut Entity) -> SystemResult {
            Self::hold(entity);
            Ok(())
        }

        fn on_update(&self, _ctx: &TickContext<'_>, entity: &mut Entity) -> SystemResult {
            Self::hold(entity);
            Ok(())
        }
    }

    fn contended_engine(capabilities: Capabilities) -> Engine {
        let (registry, _) = registry();
        let config = EngineConfig {
            worker_threads: Some(2),
            tick_budget_ms: 0,
            detect_write_contention: true,
            ..EngineConfig::default()
        };
        Engine::builder(registry)
            .with_config(config)
            .with_system(Hog {
                name: "left",
                capabilities,
            })
            .with_system(Hog {
                name: "right",
                capabilities,
            })
            .build()
            .unwrap()
    }

    fn registry() -> (ComponentRegistry, DataAccessor<Health>) {
        let mut registry = ComponentRegistry::new();
        let health = registry.register::<Health>();
        (registry, health)
    }

    #[test]
    fn test_created_entity_is_admitted_next_tick() {
        let (registry, health) = registry();
        let mut engine = Engine::builder(registry).with_system(Regen { health }).build().unwrap();

        let handle = engine.create_entity("hero");
        handle.write().add_data(health).unwrap().value = 10;
        assert_eq!(engine.added().len(), 1);

        let stats = engine.update(Vec::new()).unwrap();
        assert_eq!(stats.tick, 0);
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.invocations_of(Trigger::Update), 1);
        assert_eq!(engine.active().len(), 1);
        assert_eq!(engine.tick(), 1);

        let entity = handle.read();
        assert_eq!(entity.current(health).unwrap().value, 11);
        assert_eq!(entity.previous(health).unwrap().value, 11);
        assert!(!entity.was_added(health.id()));
    }

    #[test]
    fn test_remove_before_admission_is_silent() {
        let (registry, health) = registry();
        let mut engine = Engine::builder(registry).with_system(Regen { health }).build().unwrap();

        let id = engine.create_entity("ghost").id();
        engine.remove_entity(id).unwrap();
        let stats = engine.update(Vec::new()).unwrap();

        assert_eq!(stats.admitted, 0);
        assert_eq!(stats.evicted, 0);
        assert!(engine.entity(id).is_none());
    }

    #[test]
    fn test_remove_unknown_and_global() {
        let (registry, _) = registry();
        let mut engine = Engine::builder(registry).build().unwrap();

        assert!(matches!(
            engine.remove_entity(EntityId::new(77)),
            Err(EngineError::UnknownEntity { .. })
        ));
        assert!(matches!(
            engine.remove_entity(EntityId::GLOBAL),
            Err(EngineError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn test_synchronize_state_is_idempotent() {
        let (registry, _) = registry();
        let mut engine = Engine::builder(registry).build().unwrap();
        engine.create_entity("a");

        engine.synchronize_state().unwrap();
        engine.synchronize_state().unwrap();
        assert_eq!(engine.active().len(), 1);

        let stats = engine.update(Vec::new()).unwrap();
        assert_eq!(stats.admitted, 1);
    }

    #[test]
    fn test_deferred_commands_apply_after_commit() {
        let (registry, _) = registry();
        let mut engine = Engine::builder(registry)
            .with_system(Spawner {
                spawned: Mutex::new(Vec::new()),
            })
            .build()
            .unwrap();

        engine.update(Vec::new()).unwrap();
        assert_eq!(engine.added().len(), 1);
        assert!(engine.active().is_empty());

        let stats = engine.update(Vec::new()).unwrap();
        assert_eq!(stats.admitted, 1);
        // child-0 was admitted this tick, then removed by the deferred command
        assert_eq!(engine.removed().len(), 1);
        assert_eq!(engine.added().len(), 1);

        // child-0 evicted, child-1 admitted and then removed in turn
        let stats = engine.update(Vec::new()).unwrap();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.admitted, 1);
        assert!(engine.active().is_empty());
        assert_eq!(engine.removed().len(), 1);
        assert_eq!(engine.added().len(), 1);
    }

    #[test]
    fn test_failed_tick_does_not_commit() {
        let (registry, health) = registry();
        let mut engine = Engine::builder(registry)
            .with_system(First)
            .with_system(Broken)
            .build()
            .unwrap();

        let handle = engine.create_entity("victim");
        handle.write().add_data(health).unwrap().value = 3;
        engine.queue_input(5u8).unwrap();

        let err = engine.update(Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::SystemFailed { trigger: Trigger::GlobalPreUpdate, entity: None, .. }
        ));
        assert_eq!(engine.tick(), 0);
        assert!(handle.read().was_added(health.id()));
        assert_eq!(engine.unrouted.len(), 1);
    }

    #[test]
    fn test_get_system() {
        let (registry, health) = registry();
        let engine = Engine::builder(registry).with_system(Regen { health }).build().unwrap();

        assert_eq!(engine.get_system::<Regen>().unwrap().health.id(), health.id());
        assert!(matches!(
            engine.get_system::<Broken>(),
            Err(EngineError::UnknownSystem { type_name }) if type_name.ends_with("Broken")
        ));
    }

    #[test]
    fn test_admission_events_reach_notifier() {
        let (registry, _) = registry();
        let mut engine = Engine::builder(registry).build().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let added = Arc::clone(&seen);
            engine
                .events()
                .on::<EntityAddedEvent>(move |event| added.lock().push(format!("+{}", event.name)));
            let removed = Arc::clone(&seen);
            engine
                .events()
                .on::<EntityRemovedEvent>(move |event| removed.lock().push(format!("-{}", event.name)));
        }

        let id = engine.create_entity("scout").id();
        engine.update(Vec::new()).unwrap();
        engine.remove_entity(id).unwrap();
        engine.update(Vec::new()).unwrap();

        assert_eq!(engine.dispatch_events().unwrap(), 2);
        assert_eq!(*seen.lock(), vec!["+scout".to_owned(), "-scout".to_owned()]);
    }

    #[test]
    fn test_inputs_counted() {
        let (registry, _) = registry();
        let mut engine = Engine::builder(registry).build().unwrap();
        engine.queue_input(1u32).unwrap();
        engine.input_sender().send(2u32).unwrap();

        let stats = engine.update(vec![boxed(3u32)]).unwrap();
        assert_eq!(stats.inputs, 3);
        let stats = engine.update(Vec::new()).unwrap();
        assert_eq!(stats.inputs, 0);
    }

    #[test]
    fn test_worker_pool_config() {
        let (registry, health) = registry();
        let config = EngineConfig {
            worker_threads: Some(2),
            detect_write_contention: true,
            ..EngineConfig::default()
        };
        let mut engine = Engine::builder(registry)
            .with_config(config)
            .with_system(Regen { health })
            .build()
            .unwrap();

        for i in 0..16 {
            engine.create_entity(format!("e{i}")).write().add_data(health).unwrap();
        }
        let stats = engine.update(Vec::new()).unwrap();
        assert_eq!(stats.invocations_of(Trigger::Update), 16);
        assert_eq!(stats.write_contention, 0);
        assert_eq!(engine.timing().total_ticks, 1);
    }

    #[test]
    fn test_concurrent_writers_are_counted() {
        let mut engine = contended_engine(Capabilities::ON_UPDATE);
        assert_eq!(engine.execution_groups().len(), 2);
        engine.create_entity("contested");

        let stats = engine.update(Vec::new()).unwrap();
        assert_eq!(stats.invocations_of(Trigger::Update), 2);
        assert!(stats.write_contention > 0);

        // the counter restarts every tick
        let stats = engine.update(Vec::new()).unwrap();
        assert_eq!(stats.write_contention, 1);
    }

    #[test]
    fn test_contention_during_admission_is_counted() {
        let mut engine = contended_engine(Capabilities::ON_ADDED);
        engine.create_entity("newcomer");

        engine.synchronize_state().unwrap();
        let stats = engine.update(Vec::new()).unwrap();
        assert_eq!(stats.invocations_of(Trigger::Added), 2);
        assert!(stats.write_contention > 0);

        let stats = engine.update(Vec::new()).unwrap();
        assert_eq!(stats.write_contention, 0);
    }

    #[test]
    fn test_removal_after_admission_still_commits() {
        let (registry, health) = registry();
        let mut engine = Engine::builder(registry).build().unwrap();
        let handle = engine.create_entity("leaver");
        handle.write().add_data(health).unwrap().value = 1;
        engine.update(Vec::new()).unwrap();

        engine.synchronize_state().unwrap();
        handle.write().modify(health).unwrap().value = 42;
        engine.remove_entity(handle.id()).unwrap();
        let stats = engine.update(Vec::new()).unwrap();
        assert_eq!(stats.evicted, 0);
        assert_eq!(engine.removed().len(), 1);
        {
            let entity = handle.read();
            assert_eq!(entity.previous(health).unwrap().value, 42);
            assert!(!entity.was_modified(health.id()));
        }

        let stats = engine.update(Vec::new()).unwrap();
        assert_eq!(stats.evicted, 1);
        assert!(engine.entity(handle.id()).is_none());
    }
}
