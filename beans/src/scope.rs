//! Custom bean scopes.

use crate::core::Bean;
use crate::disposal::{destroy_quietly, DisposableBean};
use crate::error::Result;
use crate::singleton::Created;

use std::fmt;
use std::sync::Arc;

use indexmap::map::Entry;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

/// A scope that owns the instances of the beans declared with its name.
pub trait CustomScope: Send + Sync {
  /// Returns the instance bound to `name` in this scope, calling `factory` to
  /// build it when there is none yet.
  ///
  /// The scope takes over the disposal of the instance it binds. A built
  /// instance that is not bound must be disposed of right away.
  fn get(&self, name: &str, factory: &mut dyn FnMut() -> Result<Created>) -> Result<Bean>;

  /// Unbinds `name`, returning the instance if there was one. The destruction
  /// callback of a removed bean is discarded; the caller destroys the bean.
  fn remove(&self, name: &str) -> Option<Bean>;

  /// Registers a callback to run when the scoped instance of `name` ends.
  fn register_destruction_callback(&self, name: &str, callback: Arc<dyn DisposableBean>);

  /// Identifier of the current scope instance, if the scope has one.
  fn conversation_id(&self) -> Option<String> {
    None
  }
}

/// A map-backed scope whose instances live until [`MapScope::reset`].
#[derive(Default)]
pub struct MapScope {
  id: Option<String>,
  objects: Mutex<IndexMap<String, Bean>>,
  callbacks: Mutex<IndexMap<String, Arc<dyn DisposableBean>>>,
}

impl MapScope {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_id(id: impl Into<String>) -> Self {
    Self {
      id: Some(id.into()),
      ..Self::default()
    }
  }

  pub fn len(&self) -> usize {
    self.objects.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.objects.lock().is_empty()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.objects.lock().contains_key(name)
  }

  /// Ends the scope: runs destruction callbacks, newest first, and drops every instance.
  pub fn reset(&self) {
    let callbacks: Vec<_> = self.callbacks.lock().drain(..).collect();
    for (name, callback) in callbacks.into_iter().rev() {
      destroy_quietly(&name, callback.as_ref());
    }
    self.objects.lock().clear();
  }
}

impl CustomScope for MapScope {
  fn get(&self, name: &str, factory: &mut dyn FnMut() -> Result<Created>) -> Result<Bean> {
    if let Some(existing) = self.objects.lock().get(name).cloned() {
      return Ok(existing);
    }
    // Built without holding the map lock so scoped beans may depend on each other.
    let Created { bean, disposal } = factory()?;
    let mut objects = self.objects.lock();
    match objects.entry(name.to_owned()) {
      Entry::Occupied(occupied) => {
        let existing = occupied.get().clone();
        drop(objects);
        debug!("Discarding redundant instance of scoped bean '{}'", name);
        if let Some(disposal) = disposal {
          destroy_quietly(name, disposal.as_ref());
        }
        Ok(existing)
      }
      Entry::Vacant(vacant) => {
        vacant.insert(bean.clone());
        if let Some(disposal) = disposal {
          self.register_destruction_callback(name, disposal);
        }
        Ok(bean)
      }
    }
  }

  fn remove(&self, name: &str) -> Option<Bean> {
    self.callbacks.lock().shift_remove(name);
    self.objects.lock().shift_remove(name)
  }

  fn register_destruction_callback(&self, name: &str, callback: Arc<dyn DisposableBean>) {
    self.callbacks.lock().insert(name.to_owned(), callback);
  }

  fn conversation_id(&self) -> Option<String> {
    self.id.clone()
  }
}

impl fmt::Debug for MapScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MapScope")
      .field("id", &self.id)
      .field("objects", &self.objects.lock().keys().collect::<Vec<_>>())
      .finish()
  }
}
