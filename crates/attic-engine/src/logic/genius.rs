use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::anyhow;

use crate::error::EngineError;
use crate::time::FrameClock;

use super::entity::{Entity, EntityId};
use super::property::Property;
use super::world::World;

/// Deferred mutation executed on the scheduler thread.
pub type Task = Box<dyn FnOnce(&mut World) -> anyhow::Result<()> + Send>;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct GeniusConfig {
    /// Target duration of one tick. The loop sleeps off whatever a tick leaves.
    pub tick_interval: Duration,
    pub thread_name: String,
}

impl Default for GeniusConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1) / 60,
            thread_name: "attic-genius".to_string(),
        }
    }
}

struct GeniusShared {
    config: GeniusConfig,
    running: RwLock<bool>,
    tasks: Mutex<Vec<Task>>,
    world: Mutex<Option<World>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    failure: Mutex<Option<anyhow::Error>>,
    next_entity: AtomicU64,
    ticks: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GeniusShared {
    fn is_running(&self) -> bool {
        *self.running.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_running(&self, running: bool) {
        *self.running.write().unwrap_or_else(PoisonError::into_inner) = running;
    }

    /// One step: entity updates, then every task queued before this point.
    fn tick(&self, world: &mut World, dt: f32) -> anyhow::Result<()> {
        world.update(dt);

        // Swap under the lock; run outside it so tasks can submit more tasks.
        let mut tasks = std::mem::take(&mut *lock(&self.tasks)).into_iter();
        while let Some(task) = tasks.next() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(world)));
            let result = match outcome {
                Ok(result) => result,
                Err(payload) => Err(anyhow!("task panicked: {}", panic_message(&*payload))),
            };
            if let Err(e) = result {
                self.requeue_front(tasks);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Puts tasks that never ran back ahead of anything submitted since.
    fn requeue_front(&self, unrun: impl Iterator<Item = Task>) {
        let mut queue = lock(&self.tasks);
        let submitted = std::mem::take(&mut *queue);
        queue.extend(unrun);
        queue.extend(submitted);
    }

    fn run(&self) {
        let Some(mut world) = lock(&self.world).take() else {
            log::error!("scheduler started without a world");
            self.set_running(false);
            return;
        };

        log::info!("scheduler started ({:?} per tick)", self.config.tick_interval);
        let mut clock = FrameClock::new();

        while self.is_running() {
            let ft = clock.tick();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.tick(&mut world, ft.dt)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(payload) => Some(anyhow!("scheduler tick panicked: {}", panic_message(&*payload))),
            };

            if let Some(e) = failure {
                log::error!("scheduler stopped on fatal error: {e:#}");
                *lock(&self.failure) = Some(e);
                self.set_running(false);
                break;
            }

            self.ticks.fetch_add(1, Ordering::Relaxed);
            let pause = clock.remaining(self.config.tick_interval);
            if !pause.is_zero() {
                thread::sleep(pause);
            }
        }

        *lock(&self.world) = Some(world);
        log::info!(
            "scheduler stopped after {} ticks",
            self.ticks.load(Ordering::Relaxed)
        );
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Fixed-step simulation scheduler.
///
/// Owns the [`World`] and runs it on a dedicated thread. Other threads reach
/// the world only through [`submit_task`](Self::submit_task); tasks run in
/// submission order at the end of the next tick, after entity updates.
///
/// Cloning is cheap; clones control the same scheduler.
#[derive(Clone)]
pub struct Genius {
    shared: Arc<GeniusShared>,
}

impl Genius {
    pub fn new(config: GeniusConfig) -> Self {
        Self::with_world(config, World::new())
    }

    pub fn with_world(config: GeniusConfig, world: World) -> Self {
        Self {
            shared: Arc::new(GeniusShared {
                config,
                running: RwLock::new(false),
                tasks: Mutex::new(Vec::new()),
                world: Mutex::new(Some(world)),
                thread: Mutex::new(None),
                failure: Mutex::new(None),
                next_entity: AtomicU64::new(1),
                ticks: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &GeniusConfig {
        &self.shared.config
    }

    /// Safe to poll from any thread.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Completed ticks since construction.
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    /// Spawns the loop thread.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        // A previous loop may still be handing the world back.
        self.reap_thread();

        {
            let mut running = self
                .shared
                .running
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if *running {
                return Err(EngineError::AlreadyRunning);
            }
            *running = true;
        }
        *lock(&self.shared.failure) = None;

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(self.shared.config.thread_name.clone())
            .spawn(move || shared.run());

        match spawned {
            Ok(handle) => {
                *lock(&self.shared.thread) = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.set_running(false);
                Err(EngineError::config(format!("cannot spawn scheduler thread: {e}")))
            }
        }
    }

    /// Requests the loop to exit at its next tick boundary.
    pub fn stop(&self) -> Result<(), EngineError> {
        let mut running = self
            .shared
            .running
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !*running {
            return Err(EngineError::NotRunning);
        }
        *running = false;
        Ok(())
    }

    /// Queues `task` for the scheduler thread. Callable from any thread,
    /// including from inside a task; such tasks run on a later tick.
    pub fn submit_task<F>(&self, task: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut World) -> anyhow::Result<()> + Send + 'static,
    {
        // The read guard keeps `stop` from slipping in between check and push.
        let running = self
            .shared
            .running
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if !*running {
            return Err(EngineError::NotRunning);
        }
        lock(&self.shared.tasks).push(Box::new(task));
        drop(running);
        Ok(())
    }

    /// Number of tasks waiting for the next tick.
    pub fn pending_tasks(&self) -> usize {
        lock(&self.shared.tasks).len()
    }

    /// Builds an entity now and makes it live on the next tick.
    pub fn create_entity(
        &self,
        properties: Vec<Box<dyn Property>>,
    ) -> Result<EntityId, EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        let id = EntityId(self.shared.next_entity.fetch_add(1, Ordering::Relaxed));
        let entity = Entity::new(id, properties)?;
        self.submit_task(move |world| Ok(world.add_entity(entity)?))?;
        Ok(id)
    }

    /// Waits for the loop thread to exit and returns its fatal error, if any.
    ///
    /// Fails when called from the loop thread itself.
    pub fn join(&self) -> anyhow::Result<()> {
        let handle = {
            let mut slot = lock(&self.shared.thread);
            if slot
                .as_ref()
                .is_some_and(|h| h.thread().id() == thread::current().id())
            {
                return Err(anyhow!("cannot join the scheduler from its own thread"));
            }
            slot.take()
        };

        if let Some(handle) = handle {
            if handle.join().is_err() {
                return Err(anyhow!("scheduler thread panicked"));
            }
        }

        match lock(&self.shared.failure).take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Runs `f` on the world while the scheduler is stopped.
    pub fn inspect_world<R>(&self, f: impl FnOnce(&mut World) -> R) -> Result<R, EngineError> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        self.reap_thread();
        let mut world = lock(&self.shared.world);
        let world = world
            .as_mut()
            .ok_or_else(|| EngineError::config("world is held by the scheduler thread"))?;
        Ok(f(world))
    }

    fn reap_thread(&self) {
        let handle = lock(&self.shared.thread).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                *lock(&self.shared.thread) = Some(handle);
                return;
            }
            if handle.join().is_err() {
                log::error!("scheduler thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Genius {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Genius")
            .field("running", &self.is_running())
            .field("ticks", &self.ticks())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::logic::property::tests::Recorder;
    use crate::logic::{PropertyCore, PropertyEvent, ValueProperty};

    const WAIT: Duration = Duration::from_secs(5);

    fn fast() -> GeniusConfig {
        GeniusConfig {
            tick_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn shutdown(genius: &Genius) {
        let _ = genius.stop();
        genius.join().unwrap();
    }

    // ── state machine ─────────────────────────────────────────────────────

    #[test]
    fn start_twice_fails() {
        let genius = Genius::new(fast());
        genius.start().unwrap();
        assert_eq!(genius.start(), Err(EngineError::AlreadyRunning));
        shutdown(&genius);
    }

    #[test]
    fn stop_when_stopped_fails() {
        let genius = Genius::new(fast());
        assert_eq!(genius.stop(), Err(EngineError::NotRunning));
    }

    #[test]
    fn submit_while_stopped_fails_and_does_not_enqueue() {
        let genius = Genius::new(fast());
        assert_eq!(genius.submit_task(|_| Ok(())), Err(EngineError::NotRunning));
        assert_eq!(genius.pending_tasks(), 0);
    }

    #[test]
    fn restart_after_stop() {
        let genius = Genius::new(fast());
        genius.start().unwrap();
        shutdown(&genius);
        genius.start().unwrap();
        assert!(genius.is_running());
        shutdown(&genius);
    }

    // ── tasks ─────────────────────────────────────────────────────────────

    #[test]
    fn tasks_run_in_submission_order_on_loop_thread() {
        let genius = Genius::new(fast());
        genius.start().unwrap();
        let (tx, rx) = mpsc::channel();

        for name in ["a", "b", "c"] {
            let tx = tx.clone();
            genius
                .submit_task(move |_| {
                    let thread = thread::current().name().map(str::to_owned);
                    tx.send((name, thread))?;
                    Ok(())
                })
                .unwrap();
        }

        let seen: Vec<_> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(
            seen.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert!(seen.iter().all(|(_, t)| t.as_deref() == Some("attic-genius")));
        shutdown(&genius);
    }

    #[test]
    fn task_submitted_from_task_runs_on_a_later_tick() {
        let genius = Genius::new(fast());
        genius.start().unwrap();
        let (tx, rx) = mpsc::channel();

        let inner = genius.clone();
        genius
            .submit_task(move |_| {
                let outer_tick = inner.ticks();
                let tx = tx.clone();
                let probe = inner.clone();
                inner.submit_task(move |_| {
                    tx.send((outer_tick, probe.ticks()))?;
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();

        let (outer, inner_tick) = rx.recv_timeout(WAIT).unwrap();
        assert!(inner_tick > outer);
        shutdown(&genius);
    }

    #[test]
    fn failing_task_stops_scheduler_and_surfaces_error() {
        let genius = Genius::new(fast());
        genius.start().unwrap();
        genius
            .submit_task(|_| Err(anyhow!("broken view transition")))
            .unwrap();

        let err = genius.join().unwrap_err();
        assert!(err.to_string().contains("broken view transition"));
        assert!(!genius.is_running());
    }

    #[test]
    fn tasks_behind_a_failed_one_run_after_restart() {
        let genius = Genius::new(fast());
        genius.start().unwrap();
        let (tx, rx) = mpsc::channel();

        // Pushed under one lock, so both land in the same swap.
        {
            let mut queue = lock(&genius.shared.tasks);
            queue.push(Box::new(|_: &mut World| -> anyhow::Result<()> {
                Err(anyhow!("lost connection"))
            }));
            queue.push(Box::new(move |_: &mut World| -> anyhow::Result<()> {
                tx.send("after")?;
                Ok(())
            }));
        }

        let err = genius.join().unwrap_err();
        assert!(err.to_string().contains("lost connection"));
        assert_eq!(genius.pending_tasks(), 1);
        assert!(rx.try_recv().is_err());

        genius.start().unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "after");
        shutdown(&genius);
    }

    #[test]
    fn panicking_task_keeps_the_rest_queued() {
        let genius = Genius::new(fast());
        genius.start().unwrap();
        {
            let mut queue = lock(&genius.shared.tasks);
            queue.push(Box::new(|_: &mut World| -> anyhow::Result<()> {
                panic!("bad state")
            }));
            queue.push(Box::new(|_: &mut World| -> anyhow::Result<()> { Ok(()) }));
        }

        let err = genius.join().unwrap_err();
        assert!(err.to_string().contains("bad state"));
        assert_eq!(genius.pending_tasks(), 1);
    }

    #[test]
    fn panicking_task_is_reported() {
        let genius = Genius::new(fast());
        genius.start().unwrap();
        genius.submit_task(|_| panic!("boom")).unwrap();

        let err = genius.join().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn join_from_loop_thread_fails() {
        let genius = Genius::new(fast());
        genius.start().unwrap();
        let (tx, rx) = mpsc::channel();
        let inner = genius.clone();
        genius
            .submit_task(move |_| {
                tx.send(inner.join().is_err())?;
                Ok(())
            })
            .unwrap();
        assert!(rx.recv_timeout(WAIT).unwrap());
        shutdown(&genius);
    }

    // ── entities ──────────────────────────────────────────────────────────

    #[test]
    fn created_entity_becomes_live_on_tick_boundary() {
        let genius = Genius::new(fast());
        genius.start().unwrap();
        let id = genius
            .create_entity(vec![Box::new(ValueProperty::new(3u8))])
            .unwrap();

        let (tx, rx) = mpsc::channel();
        genius
            .submit_task(move |world| {
                tx.send(world.entity(id).is_some())?;
                Ok(())
            })
            .unwrap();
        assert!(rx.recv_timeout(WAIT).unwrap());
        shutdown(&genius);
    }

    struct Counter {
        core: PropertyCore,
        updates: Arc<AtomicU64>,
    }

    impl Property for Counter {
        fn core(&self) -> &PropertyCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut PropertyCore {
            &mut self.core
        }
        fn value(&self) -> &dyn std::any::Any {
            &self.updates
        }
        fn update(&mut self, _dt: f32) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn dead_entity_lives_through_its_tick_and_is_killed_once() {
        let genius = Genius::new(fast());
        let mut world = World::new();
        let updates = Arc::new(AtomicU64::new(0));
        let removed = Arc::new(Recorder::default());

        let mut counter: Box<dyn Property> = Box::new(Counter {
            core: PropertyCore::default(),
            updates: updates.clone(),
        });
        counter.add_listener(removed.clone());
        let id = EntityId(9);
        world
            .add_entity(Entity::new(id, vec![counter]).unwrap())
            .unwrap();

        // Tick N: updated, then marked dead by a task.
        lock(&genius.shared.tasks).push(Box::new(move |w: &mut World| {
            assert!(w.kill_entity(id));
            Ok(())
        }));
        genius.shared.tick(&mut world, 0.01).unwrap();
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert!(world.entity(id).is_some());

        // Tick N+1: gone without another update.
        genius.shared.tick(&mut world, 0.01).unwrap();
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert!(world.entity(id).is_none());

        genius.shared.tick(&mut world, 0.01).unwrap();
        let kills = removed
            .events()
            .iter()
            .filter(|e| **e == PropertyEvent::Removed)
            .count();
        assert_eq!(kills, 1);
    }

    #[test]
    fn tasks_run_after_entity_updates() {
        let genius = Genius::new(fast());
        let mut world = World::new();
        let updates = Arc::new(AtomicU64::new(0));
        world
            .add_entity(
                Entity::new(
                    EntityId(1),
                    vec![Box::new(Counter {
                        core: PropertyCore::default(),
                        updates: updates.clone(),
                    })],
                )
                .unwrap(),
            )
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let seen = seen.clone();
            let updates = updates.clone();
            lock(&genius.shared.tasks).push(Box::new(move |_: &mut World| {
                lock(&seen).push((tag, updates.load(Ordering::SeqCst)));
                Ok(())
            }));
        }
        genius.shared.tick(&mut world, 0.01).unwrap();
        assert_eq!(*lock(&seen), vec![(0, 1), (1, 1), (2, 1)]);
    }
}
