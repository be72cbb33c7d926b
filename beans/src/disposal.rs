//! Teardown callbacks and their registration order.

use crate::core::Bean;
use crate::definition::LifecycleMethod;
use crate::error::BoxError;
use crate::processor::BeanPostProcessor;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::warn;

/// A teardown action for a bean.
pub trait DisposableBean: Send + Sync {
  fn destroy(&self) -> Result<(), BoxError>;
}

impl<F> DisposableBean for F
where
  F: Fn() -> Result<(), BoxError> + Send + Sync,
{
  fn destroy(&self) -> Result<(), BoxError> {
    self()
  }
}

/// Runs `disposal` for the bean `name`. Errors and panics are logged, never propagated.
pub(crate) fn destroy_quietly(name: &str, disposal: &dyn DisposableBean) {
  match catch_unwind(AssertUnwindSafe(|| disposal.destroy())) {
    Ok(Ok(())) => {}
    Ok(Err(err)) => warn!("Destruction of bean with name '{}' threw an exception: {}", name, err),
    Err(_) => warn!("Destruction of bean with name '{}' panicked", name),
  }
}

/// Runs the destruction-aware processors and then the definition's destroy
/// method against the raw bean instance.
pub struct DisposableBeanAdapter {
  name: String,
  bean: Bean,
  processors: Vec<Arc<dyn BeanPostProcessor>>,
  destroy_method: Option<LifecycleMethod>,
}

impl DisposableBeanAdapter {
  /// Returns `None` when nothing would run on destruction.
  pub fn new(
    name: &str,
    bean: Bean,
    processors: &[Arc<dyn BeanPostProcessor>],
    destroy_method: Option<LifecycleMethod>,
  ) -> Option<Self> {
    let processors: Vec<_> = processors
      .iter()
      .filter(|p| p.requires_destruction(&bean))
      .cloned()
      .collect();
    if processors.is_empty() && destroy_method.is_none() {
      return None;
    }
    Some(Self {
      name: name.to_owned(),
      bean,
      processors,
      destroy_method,
    })
  }
}

impl DisposableBean for DisposableBeanAdapter {
  fn destroy(&self) -> Result<(), BoxError> {
    let mut first_error = None;
    for processor in &self.processors {
      if let Err(err) = processor.before_destruction(&self.bean, &self.name) {
        first_error.get_or_insert(err);
      }
    }
    if let Some(destroy) = &self.destroy_method {
      if let Err(err) = destroy(&self.bean) {
        first_error.get_or_insert(err);
      }
    }
    match first_error {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}

/// Disposal callbacks keyed by bean name, in registration order.
#[derive(Default)]
pub struct DisposalRegistry {
  entries: Mutex<IndexMap<String, Arc<dyn DisposableBean>>>,
}

impl DisposalRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, name: &str, disposal: Arc<dyn DisposableBean>) {
    self.entries.lock().insert(name.to_owned(), disposal);
  }

  pub fn take(&self, name: &str) -> Option<Arc<dyn DisposableBean>> {
    self.entries.lock().shift_remove(name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.entries.lock().contains_key(name)
  }

  /// Registered names, oldest first.
  pub fn names(&self) -> Vec<String> {
    self.entries.lock().keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.lock().is_empty()
  }
}
