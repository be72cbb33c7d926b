//! Core data structures shared by the registry, the definition store and the
//! creation coordinator.

use crate::error::{BeanError, BoxError, Result};

use std::any::{type_name, Any};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A managed object. Identity is the address of the shared allocation.
pub type Bean = Arc<dyn Any + Send + Sync>;

/// Wraps a value into a [`Bean`].
pub fn bean<T: Any + Send + Sync>(value: T) -> Bean {
  Arc::new(value)
}

/// Returns `true` if both handles point at the same managed object.
pub fn same_instance(a: &Bean, b: &Bean) -> bool {
  std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Downcasts a bean to its concrete type.
pub fn downcast<T: Any + Send + Sync>(name: &str, bean: Bean) -> Result<Arc<T>> {
  bean.downcast::<T>().map_err(|_| BeanError::NotOfRequiredType {
    name: name.to_owned(),
    expected: type_name::<T>(),
  })
}

/// How a creation attempt treats the registry-wide singleton lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
  feature = "serde",
  derive(serde::Serialize, serde::Deserialize),
  serde(rename_all = "snake_case")
)]
pub enum LockMode {
  /// Wait for the lock while another thread is creating singletons.
  #[default]
  Blocking,
  /// Try the lock. If it is busy, create outside of it; the first committed
  /// instance wins and redundant instances are discarded.
  Lenient,
  /// Never take the lock.
  Unlocked,
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Correlation token identifying one creation call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CreationId(u64);

/// State of one top-level bean request, passed down the creation call stack.
///
/// It carries the lock policy for the request and the prototypes currently
/// being built on its behalf, so that a prototype requesting itself is
/// detected instead of recursing forever.
pub struct CreationContext {
  id: CreationId,
  lock_mode: LockMode,
  prototypes: Mutex<Vec<String>>,
}

impl CreationContext {
  pub fn new() -> Self {
    Self::with_lock_mode(LockMode::default())
  }

  pub fn with_lock_mode(lock_mode: LockMode) -> Self {
    Self {
      id: CreationId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
      lock_mode,
      prototypes: Mutex::new(Vec::new()),
    }
  }

  pub fn id(&self) -> CreationId {
    self.id
  }

  pub fn lock_mode(&self) -> LockMode {
    self.lock_mode
  }

  pub fn is_prototype_in_creation(&self, name: &str) -> bool {
    self.prototypes.lock().iter().any(|n| n == name)
  }

  pub(crate) fn enter_prototype(&self, name: &str) -> PrototypeGuard<'_> {
    self.prototypes.lock().push(name.to_owned());
    PrototypeGuard {
      context: self,
      name: name.to_owned(),
    }
  }
}

impl Default for CreationContext {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for CreationContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CreationContext")
      .field("id", &self.id)
      .field("lock_mode", &self.lock_mode)
      .field("prototypes", &*self.prototypes.lock())
      .finish()
  }
}

/// Keeps a prototype marked as "in creation" for the lifetime of the guard.
pub(crate) struct PrototypeGuard<'a> {
  context: &'a CreationContext,
  name: String,
}

impl Drop for PrototypeGuard<'_> {
  fn drop(&mut self) {
    let mut prototypes = self.context.prototypes.lock();
    if let Some(pos) = prototypes.iter().rposition(|n| *n == self.name) {
      prototypes.remove(pos);
    }
  }
}

/// Resolved constructor or factory-method arguments.
#[derive(Clone, Default)]
pub struct Arguments {
  values: Vec<Bean>,
}

impl Arguments {
  pub fn new(values: Vec<Bean>) -> Self {
    Self { values }
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn bean(&self, index: usize) -> Option<&Bean> {
    self.values.get(index)
  }

  /// Returns argument `index` downcast to `T`.
  pub fn get<T: Any + Send + Sync>(&self, index: usize) -> std::result::Result<Arc<T>, BoxError> {
    let value = self
      .values
      .get(index)
      .ok_or_else(|| format!("missing argument #{index}"))?;
    value
      .clone()
      .downcast::<T>()
      .map_err(|_| format!("argument #{index} is not a {}", type_name::<T>()).into())
  }

  pub fn into_vec(self) -> Vec<Bean> {
    self.values
  }
}

impl fmt::Debug for Arguments {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Arguments")
      .field("len", &self.values.len())
      .finish()
  }
}
