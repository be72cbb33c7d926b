//! Dependent/dependency/containment edges between beans.

use std::collections::HashMap;

use indexmap::IndexSet;
use parking_lot::Mutex;

#[derive(Default)]
struct GraphInner {
  // bean -> beans that depend on it
  dependents: HashMap<String, IndexSet<String>>,
  // bean -> beans it depends on
  dependencies: HashMap<String, IndexSet<String>>,
  // outer bean -> inner beans it owns
  contained: HashMap<String, IndexSet<String>>,
}

/// The edges used to order destruction. All names are canonical.
#[derive(Default)]
pub struct DependencyGraph {
  inner: Mutex<GraphInner>,
}

impl DependencyGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Records that `dependent` must be destroyed before `bean`.
  pub fn register_dependency(&self, bean: &str, dependent: &str) {
    let mut inner = self.inner.lock();
    inner
      .dependents
      .entry(bean.to_owned())
      .or_default()
      .insert(dependent.to_owned());
    inner
      .dependencies
      .entry(dependent.to_owned())
      .or_default()
      .insert(bean.to_owned());
  }

  /// Records that `contained` is owned by `containing`, which implies that
  /// `containing` depends on it.
  pub fn register_containment(&self, containing: &str, contained: &str) {
    {
      let mut inner = self.inner.lock();
      let owned = inner.contained.entry(containing.to_owned()).or_default();
      if !owned.insert(contained.to_owned()) {
        return;
      }
    }
    self.register_dependency(contained, containing);
  }

  /// Returns `true` if `dependent` depends on `bean`, directly or transitively.
  pub fn is_dependent(&self, bean: &str, dependent: &str) -> bool {
    let inner = self.inner.lock();
    let mut seen: IndexSet<&str> = IndexSet::new();
    let mut pending = vec![bean];
    while let Some(current) = pending.pop() {
      if !seen.insert(current) {
        continue;
      }
      if let Some(dependents) = inner.dependents.get(current) {
        if dependents.contains(dependent) {
          return true;
        }
        pending.extend(dependents.iter().map(String::as_str));
      }
    }
    false
  }

  pub fn has_dependents(&self, bean: &str) -> bool {
    self
      .inner
      .lock()
      .dependents
      .get(bean)
      .is_some_and(|d| !d.is_empty())
  }

  pub fn dependents_of(&self, bean: &str) -> Vec<String> {
    collect(&self.inner.lock().dependents, bean)
  }

  pub fn dependencies_of(&self, bean: &str) -> Vec<String> {
    collect(&self.inner.lock().dependencies, bean)
  }

  pub fn contained_in(&self, bean: &str) -> Vec<String> {
    collect(&self.inner.lock().contained, bean)
  }

  pub(crate) fn take_dependents(&self, bean: &str) -> Vec<String> {
    take(&mut self.inner.lock().dependents, bean)
  }

  pub(crate) fn take_contained(&self, bean: &str) -> Vec<String> {
    take(&mut self.inner.lock().contained, bean)
  }

  /// Removes `bean` from every edge, both as a key and as a member.
  pub(crate) fn forget(&self, bean: &str) {
    let mut inner = self.inner.lock();
    let GraphInner {
      dependents,
      dependencies,
      contained,
    } = &mut *inner;
    for map in [dependents, dependencies, contained] {
      map.remove(bean);
      map.retain(|_, members| {
        members.shift_remove(bean);
        !members.is_empty()
      });
    }
  }

  pub(crate) fn clear(&self) {
    let mut inner = self.inner.lock();
    inner.dependents.clear();
    inner.dependencies.clear();
    inner.contained.clear();
  }
}

fn collect(map: &HashMap<String, IndexSet<String>>, bean: &str) -> Vec<String> {
  map
    .get(bean)
    .map(|set| set.iter().cloned().collect())
    .unwrap_or_default()
}

fn take(map: &mut HashMap<String, IndexSet<String>>, bean: &str) -> Vec<String> {
  map
    .remove(bean)
    .map(|set| set.into_iter().collect())
    .unwrap_or_default()
}
