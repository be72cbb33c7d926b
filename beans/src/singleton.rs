//! The singleton registry: committed instances, early references for
//! resolving circular references, creation tracking and destruction.

use crate::core::{Bean, CreationContext, CreationId, LockMode};
use crate::disposal::{destroy_quietly, DisposableBean, DisposalRegistry};
use crate::error::{BeanError, Result};
use crate::graph::DependencyGraph;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use indexmap::IndexSet;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, info, trace};

/// Produces the early reference of a bean that is still being built.
pub type EarlyFactory = Arc<dyn Fn() -> Result<Bean> + Send + Sync>;

pub type SingletonCallback = Arc<dyn Fn(&Bean) + Send + Sync>;

const DEFAULT_SUPPRESSED_LIMIT: usize = 100;

#[derive(Clone)]
enum Slot {
  EarlyFactory(EarlyFactory),
  Early(Bean),
  Finished(Bean),
}

/// The observable state of a singleton name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingletonState {
  Absent,
  /// Marked as in creation with no reference available yet.
  InCreation,
  /// An early reference, or a factory for one, is available.
  Early,
  Finished,
}

/// The outcome of a singleton factory: the instance and, when it needs
/// teardown, its disposal callback. Both are committed together.
pub struct Created {
  pub bean: Bean,
  pub disposal: Option<Arc<dyn DisposableBean>>,
}

impl Created {
  pub fn new(bean: Bean) -> Self {
    Self { bean, disposal: None }
  }

  pub fn with_disposal(mut self, disposal: Arc<dyn DisposableBean>) -> Self {
    self.disposal = Some(disposal);
    self
  }
}

pub struct SingletonRegistry {
  slots: DashMap<String, Slot>,
  registered: Mutex<IndexSet<String>>,
  in_creation: DashMap<String, Vec<CreationId>>,
  in_creation_exclusions: DashSet<String>,
  lock: ReentrantMutex<()>,
  // Orders commits against the start of teardown.
  commit_gate: Mutex<()>,
  suppressed: Mutex<Option<Vec<BeanError>>>,
  suppressed_limit: usize,
  destruction_in_progress: AtomicBool,
  callbacks: DashMap<String, SingletonCallback>,
  disposals: DisposalRegistry,
  graph: DependencyGraph,
}

impl SingletonRegistry {
  pub fn new() -> Self {
    Self::with_suppressed_limit(DEFAULT_SUPPRESSED_LIMIT)
  }

  /// A registry keeping at most `limit` suppressed errors per creation attempt.
  pub fn with_suppressed_limit(limit: usize) -> Self {
    Self {
      slots: DashMap::new(),
      registered: Mutex::new(IndexSet::new()),
      in_creation: DashMap::new(),
      in_creation_exclusions: DashSet::new(),
      lock: ReentrantMutex::new(()),
      commit_gate: Mutex::new(()),
      suppressed: Mutex::new(None),
      suppressed_limit: limit,
      destruction_in_progress: AtomicBool::new(false),
      callbacks: DashMap::new(),
      disposals: DisposalRegistry::new(),
      graph: DependencyGraph::new(),
    }
  }

  // --- Registration ---

  /// Registers a fully built instance under `name`.
  pub fn register_singleton(&self, name: &str, bean: Bean) -> Result<()> {
    let _guard = self.lock.lock();
    if let Some(Slot::Finished(_)) = self.slot(name) {
      return Err(BeanError::AlreadyRegistered { name: name.to_owned() });
    }
    self.slots.insert(name.to_owned(), Slot::Finished(bean.clone()));
    self.registered.lock().insert(name.to_owned());
    self.notify_callback(name, &bean);
    Ok(())
  }

  /// Registers a factory producing the early reference of `name`, unless the
  /// name already has a finished instance.
  pub fn add_early_factory(&self, name: &str, factory: EarlyFactory) {
    match self.slots.entry(name.to_owned()) {
      Entry::Occupied(mut occupied) => {
        if !matches!(occupied.get(), Slot::Finished(_)) {
          occupied.insert(Slot::EarlyFactory(factory));
        }
      }
      Entry::Vacant(vacant) => {
        vacant.insert(Slot::EarlyFactory(factory));
      }
    }
    trace!("Eagerly caching bean '{}' to allow for resolving potential circular references", name);
  }

  pub fn register_disposable_bean(&self, name: &str, disposal: Arc<dyn DisposableBean>) {
    self.disposals.register(name, disposal);
  }

  /// Runs `callback` with the instance of `name` as soon as it is committed.
  pub fn add_singleton_callback<F>(&self, name: &str, callback: F)
  where
    F: Fn(&Bean) + Send + Sync + 'static,
  {
    self.callbacks.insert(name.to_owned(), Arc::new(callback));
  }

  // --- Lookup ---

  /// Returns the finished instance of `name`, or an early reference when the
  /// name is being built and one can be obtained without blocking.
  pub fn get_singleton(&self, name: &str) -> Result<Option<Bean>> {
    self.lookup(name, true)
  }

  /// The cycle-breaking lookup.
  ///
  /// Never blocks: when an early reference has to be produced and another
  /// thread holds the registry lock, `None` is returned instead.
  pub fn lookup(&self, name: &str, allow_early: bool) -> Result<Option<Bean>> {
    match self.slot(name) {
      Some(Slot::Finished(bean)) => return Ok(Some(bean)),
      _ if !self.is_singleton_currently_in_creation(name) => return Ok(None),
      Some(Slot::Early(bean)) => return Ok(Some(bean)),
      _ if !allow_early => return Ok(None),
      _ => {}
    }
    let Some(_guard) = self.lock.try_lock() else {
      return Ok(None);
    };
    match self.slot(name) {
      Some(Slot::Finished(bean)) | Some(Slot::Early(bean)) => Ok(Some(bean)),
      Some(Slot::EarlyFactory(factory)) => {
        let early = factory()?;
        if let Some(mut slot) = self.slots.get_mut(name) {
          let unchanged = matches!(&*slot, Slot::EarlyFactory(current) if same_factory(current, &factory));
          if unchanged {
            *slot = Slot::Early(early.clone());
          }
        }
        Ok(Some(early))
      }
      None => Ok(None),
    }
  }

  pub fn contains_singleton(&self, name: &str) -> bool {
    matches!(self.slot(name), Some(Slot::Finished(_)))
  }

  pub fn state(&self, name: &str) -> SingletonState {
    match self.slot(name) {
      Some(Slot::Finished(_)) => SingletonState::Finished,
      Some(Slot::Early(_)) | Some(Slot::EarlyFactory(_)) => SingletonState::Early,
      None if self.is_singleton_currently_in_creation(name) => SingletonState::InCreation,
      None => SingletonState::Absent,
    }
  }

  /// Names of the finished singletons, in the order they were committed.
  pub fn singleton_names(&self) -> Vec<String> {
    self.registered.lock().iter().cloned().collect()
  }

  pub fn singleton_count(&self) -> usize {
    self.registered.lock().len()
  }

  // --- Creation ---

  /// Returns the singleton `name`, building it with `factory` if needed, under
  /// the default blocking lock policy.
  pub fn get_or_create_singleton<F>(&self, name: &str, factory: F) -> Result<Bean>
  where
    F: FnOnce() -> Result<Bean>,
  {
    self.get_or_create_singleton_in(name, &CreationContext::new(), factory)
  }

  pub fn get_or_create_singleton_in<F>(&self, name: &str, ctx: &CreationContext, factory: F) -> Result<Bean>
  where
    F: FnOnce() -> Result<Bean>,
  {
    self.get_or_create(name, ctx, || factory().map(Created::new))
  }

  /// Returns the singleton `name`, invoking `factory` at most once per
  /// committed instance.
  ///
  /// On failure the partially built entry is evicted together with every bean
  /// that already captured a reference to it.
  pub fn get_or_create<F>(&self, name: &str, ctx: &CreationContext, factory: F) -> Result<Bean>
  where
    F: FnOnce() -> Result<Created>,
  {
    if let Some(Slot::Finished(bean)) = self.slot(name) {
      return Ok(bean);
    }

    let guard = match ctx.lock_mode() {
      LockMode::Blocking => Some(self.lock.lock()),
      LockMode::Lenient => {
        let guard = self.lock.try_lock();
        if guard.is_none() {
          info!(
            "Creating singleton bean '{}' in thread {:?} while other thread holds singleton lock for other beans",
            name,
            std::thread::current().name().unwrap_or("<unnamed>")
          );
        }
        guard
      }
      LockMode::Unlocked => None,
    };
    let locked = guard.is_some();

    if let Some(Slot::Finished(bean)) = self.slot(name) {
      return Ok(bean);
    }
    if self.destruction_in_progress.load(Ordering::Acquire) {
      return Err(BeanError::DestructionInProgress { name: name.to_owned() });
    }
    debug!("Creating shared instance of singleton bean '{}'", name);

    let mark = self.mark_in_creation(name, ctx, locked)?;
    let recording = locked && self.begin_recording();
    let outcome = factory();
    drop(mark);
    let suppressed = if recording { self.end_recording() } else { Vec::new() };

    match outcome {
      Ok(created) => self.commit(name, created).map_err(|err| {
        self.rollback_failed_creation(name);
        err
      }),
      Err(BeanError::AlreadyRegistered { name: registered }) if registered == name => {
        // The factory registered the instance itself.
        match self.slot(name) {
          Some(Slot::Finished(bean)) => Ok(bean),
          _ => Err(BeanError::AlreadyRegistered { name: registered }),
        }
      }
      Err(mut err) => {
        self.rollback_failed_creation(name);
        for cause in suppressed {
          err.add_related(cause);
        }
        Err(err)
      }
    }
  }

  /// Records an error that was tolerated during the current creation attempt.
  pub fn on_suppressed(&self, err: BeanError) {
    let mut suppressed = self.suppressed.lock();
    if let Some(errors) = suppressed.as_mut() {
      if errors.len() < self.suppressed_limit {
        errors.push(err);
      }
    }
  }

  /// Excludes `name` from (or re-includes it in) the in-creation check.
  pub fn set_currently_in_creation(&self, name: &str, in_creation: bool) {
    if in_creation {
      self.in_creation_exclusions.remove(name);
    } else {
      self.in_creation_exclusions.insert(name.to_owned());
    }
  }

  pub fn is_currently_in_creation(&self, name: &str) -> bool {
    !self.in_creation_exclusions.contains(name) && self.is_singleton_currently_in_creation(name)
  }

  pub fn is_singleton_currently_in_creation(&self, name: &str) -> bool {
    self.in_creation.contains_key(name)
  }

  // --- Dependencies ---

  pub fn register_dependency(&self, bean: &str, dependent: &str) {
    self.graph.register_dependency(bean, dependent);
  }

  pub fn register_containment(&self, containing: &str, contained: &str) {
    self.graph.register_containment(containing, contained);
  }

  pub fn is_dependent(&self, bean: &str, dependent: &str) -> bool {
    self.graph.is_dependent(bean, dependent)
  }

  pub fn has_dependents(&self, bean: &str) -> bool {
    self.graph.has_dependents(bean)
  }

  /// Names of the beans that depend on `bean`.
  pub fn dependents_of(&self, bean: &str) -> Vec<String> {
    self.graph.dependents_of(bean)
  }

  /// Names of the beans `bean` depends on.
  pub fn dependencies_of(&self, bean: &str) -> Vec<String> {
    self.graph.dependencies_of(bean)
  }

  // --- Destruction ---

  /// Evicts `name` and destroys it after every bean depending on it.
  pub fn destroy_singleton(&self, name: &str) {
    self.remove_singleton(name);
    let disposal = self.disposals.take(name);
    self.destroy_bean(name, disposal);
  }

  /// Destroys every singleton, newest registration first.
  ///
  /// While this runs, new singleton creation fails with
  /// [`BeanError::DestructionInProgress`]. A creation already under way when
  /// teardown starts is disposed of instead of being committed.
  pub fn destroy_singletons(&self) {
    trace!("Destroying singletons in {:?}", self);
    {
      let _gate = self.commit_gate.lock();
      self.destruction_in_progress.store(true, Ordering::Release);
    }

    let names = self.disposals.names();
    for name in names.iter().rev() {
      self.destroy_singleton(name);
    }
    self.graph.clear();

    let _guard = self.lock.lock();
    self.slots.clear();
    self.registered.lock().clear();
    self.destruction_in_progress.store(false, Ordering::Release);
  }

  pub fn is_destruction_in_progress(&self) -> bool {
    self.destruction_in_progress.load(Ordering::Acquire)
  }

  fn destroy_bean(&self, name: &str, disposal: Option<Arc<dyn DisposableBean>>) {
    let dependents = self.graph.take_dependents(name);
    if !dependents.is_empty() {
      trace!("Retrieved dependent beans for bean '{}': {:?}", name, dependents);
    }
    for dependent in &dependents {
      self.destroy_singleton(dependent);
    }

    if let Some(disposal) = disposal {
      destroy_quietly(name, disposal.as_ref());
    }

    for contained in self.graph.take_contained(name) {
      self.destroy_singleton(&contained);
    }
    self.graph.forget(name);
  }

  /// Undoes a failed creation of `name`, unless another caller committed it meanwhile.
  fn rollback_failed_creation(&self, name: &str) {
    let _guard = self.lock.lock();
    if self.contains_singleton(name) {
      return;
    }
    self.slots.remove_if(name, |_, slot| !matches!(slot, Slot::Finished(_)));
    self.destroy_bean(name, None);
  }

  /// Evicts the entry of `name` without running its disposal.
  pub fn remove_singleton(&self, name: &str) {
    let _guard = self.lock.lock();
    self.slots.remove(name);
    self.registered.lock().shift_remove(name);
  }

  // --- Internals ---

  fn slot(&self, name: &str) -> Option<Slot> {
    self.slots.get(name).map(|slot| slot.value().clone())
  }

  fn commit(&self, name: &str, created: Created) -> Result<Bean> {
    let Created { bean, disposal } = created;
    let gate = self.commit_gate.lock();
    if self.destruction_in_progress.load(Ordering::Acquire) {
      drop(gate);
      debug!("Discarding singleton bean '{}' created while singletons are being destroyed", name);
      if let Some(disposal) = disposal {
        destroy_quietly(name, disposal.as_ref());
      }
      return Err(BeanError::DestructionInProgress { name: name.to_owned() });
    }

    let existing = match self.slots.entry(name.to_owned()) {
      Entry::Occupied(mut occupied) => match occupied.get() {
        Slot::Finished(existing) => Some(existing.clone()),
        _ => {
          occupied.insert(Slot::Finished(bean.clone()));
          None
        }
      },
      Entry::Vacant(vacant) => {
        vacant.insert(Slot::Finished(bean.clone()));
        None
      }
    };

    match existing {
      Some(existing) => {
        drop(gate);
        debug!("Discarding redundant instance of singleton bean '{}'", name);
        if let Some(disposal) = disposal {
          destroy_quietly(name, disposal.as_ref());
        }
        Ok(existing)
      }
      None => {
        self.registered.lock().insert(name.to_owned());
        if let Some(disposal) = disposal {
          self.disposals.register(name, disposal);
        }
        drop(gate);
        self.notify_callback(name, &bean);
        Ok(bean)
      }
    }
  }

  fn notify_callback(&self, name: &str, bean: &Bean) {
    let callback = self.callbacks.get(name).map(|c| c.value().clone());
    if let Some(callback) = callback {
      callback(bean);
    }
  }

  fn mark_in_creation(&self, name: &str, ctx: &CreationContext, locked: bool) -> Result<CreationMark<'_>> {
    if self.in_creation_exclusions.contains(name) {
      return Ok(CreationMark {
        registry: self,
        name: name.to_owned(),
        id: None,
      });
    }
    let mut owners = self.in_creation.entry(name.to_owned()).or_default();
    // Holding the lock, any other mark is a cycle. Without it, only our own is.
    let conflict = if locked {
      !owners.is_empty()
    } else {
      owners.contains(&ctx.id())
    };
    if conflict {
      return Err(BeanError::in_creation(name));
    }
    owners.push(ctx.id());
    Ok(CreationMark {
      registry: self,
      name: name.to_owned(),
      id: Some(ctx.id()),
    })
  }

  fn begin_recording(&self) -> bool {
    let mut suppressed = self.suppressed.lock();
    if suppressed.is_some() {
      return false;
    }
    *suppressed = Some(Vec::new());
    true
  }

  fn end_recording(&self) -> Vec<BeanError> {
    self.suppressed.lock().take().unwrap_or_default()
  }
}

impl Default for SingletonRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for SingletonRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SingletonRegistry")
      .field("singletons", &self.registered.lock().len())
      .field("in_creation", &self.in_creation.len())
      .field("disposals", &self.disposals.len())
      .finish_non_exhaustive()
  }
}

fn same_factory(a: &EarlyFactory, b: &EarlyFactory) -> bool {
  std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Keeps a name marked as in creation until dropped.
struct CreationMark<'a> {
  registry: &'a SingletonRegistry,
  name: String,
  id: Option<CreationId>,
}

impl Drop for CreationMark<'_> {
  fn drop(&mut self) {
    let Some(id) = self.id else { return };
    if let Some(mut owners) = self.registry.in_creation.get_mut(&self.name) {
      if let Some(pos) = owners.iter().position(|owner| *owner == id) {
        owners.remove(pos);
      }
    }
    self
      .registry
      .in_creation
      .remove_if(&self.name, |_, owners| owners.is_empty());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::{bean, same_instance};

  #[test]
  fn early_factory_runs_once_and_is_promoted() {
    let registry = SingletonRegistry::new();
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let raw = bean(1u32);
    let exposed = raw.clone();

    let result = registry.get_or_create_singleton("a", || {
      registry.add_early_factory(
        "a",
        Arc::new(move || -> Result<Bean> {
          *counter.lock() += 1;
          Ok(exposed.clone())
        }),
      );
      assert_eq!(registry.state("a"), SingletonState::Early);
      let first = registry.get_singleton("a")?.unwrap();
      let second = registry.get_singleton("a")?.unwrap();
      assert!(same_instance(&first, &second));
      Ok(raw.clone())
    });

    assert!(same_instance(&result.unwrap(), &raw));
    assert_eq!(*calls.lock(), 1);
    assert_eq!(registry.state("a"), SingletonState::Finished);
  }

  #[test]
  fn lookup_outside_creation_ignores_early_slots() {
    let registry = SingletonRegistry::new();
    registry.add_early_factory("ghost", Arc::new(|| -> Result<Bean> { Ok(bean(0u8)) }));
    assert!(registry.lookup("ghost", true).unwrap().is_none());
  }

  #[test]
  fn nested_request_for_the_same_name_is_a_cycle() {
    let registry = SingletonRegistry::new();
    let err = registry
      .get_or_create_singleton("a", || registry.get_or_create_singleton("a", || Ok(bean(1u8))))
      .unwrap_err();
    assert!(err.is_caused_by_circularity());
    assert_eq!(registry.state("a"), SingletonState::Absent);
  }

  #[test]
  fn excluded_names_skip_the_in_creation_check() {
    let registry = SingletonRegistry::new();
    registry.set_currently_in_creation("a", false);
    let created = registry
      .get_or_create_singleton("a", || registry.get_or_create_singleton("a", || Ok(bean(1u8))))
      .unwrap();
    assert_eq!(*created.downcast_ref::<u8>().unwrap(), 1);
    assert!(!registry.is_currently_in_creation("a"));
  }

  #[test]
  fn suppressed_errors_are_attached_to_the_failure() {
    let registry = SingletonRegistry::new();
    let err = registry
      .get_or_create_singleton("a", || {
        registry.on_suppressed(BeanError::NoSuchDefinition { name: "x".into() });
        Err(BeanError::creation("a", "boom"))
      })
      .unwrap_err();
    assert_eq!(err.related_causes().len(), 1);
  }

  #[test]
  fn callbacks_run_on_commit() {
    let registry = SingletonRegistry::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    registry.add_singleton_callback("a", move |bean| {
      *sink.lock() = bean.downcast_ref::<u8>().copied();
    });
    registry.register_singleton("a", bean(9u8)).unwrap();
    assert_eq!(*seen.lock(), Some(9));
  }
}
