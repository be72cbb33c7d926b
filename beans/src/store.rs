//! Raw definition storage and the parent/child merge with its metadata cache.

use crate::alias::AliasRegistry;
use crate::definition::{BeanDefinition, MergedDefinition, Scope};
use crate::error::{BeanError, Result};

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

/// Holds raw definitions by canonical name and computes their merged form.
pub struct DefinitionStore {
  aliases: Arc<AliasRegistry>,
  definitions: DashMap<String, Arc<BeanDefinition>>,
  names: RwLock<Vec<String>>,
  merged: DashMap<String, Arc<MergedDefinition>>,
  already_created: DashSet<String>,
  merge_lock: Mutex<()>,
  allow_overriding: bool,
  cache_bean_metadata: bool,
}

impl DefinitionStore {
  pub fn new(aliases: Arc<AliasRegistry>, allow_overriding: bool, cache_bean_metadata: bool) -> Self {
    Self {
      aliases,
      definitions: DashMap::new(),
      names: RwLock::new(Vec::new()),
      merged: DashMap::new(),
      already_created: DashSet::new(),
      merge_lock: Mutex::new(()),
      allow_overriding,
      cache_bean_metadata,
    }
  }

  /// Registers `definition` under `name`. Returns `true` if it replaced an
  /// existing definition, in which case cached merged forms of the name and
  /// of every definition inheriting from it are marked stale.
  pub fn register(&self, name: &str, definition: BeanDefinition) -> Result<bool> {
    if name.is_empty() {
      return Err(BeanError::DefinitionStore {
        name: name.to_owned(),
        message: "bean name must not be empty".to_owned(),
      });
    }
    if !definition.is_abstract()
      && definition.parent_name().is_none()
      && definition.construction_strategy().is_none()
    {
      return Err(BeanError::DefinitionStore {
        name: name.to_owned(),
        message: "no supplier, factory method or constructor specified".to_owned(),
      });
    }

    let replaced = {
      let mut names = self.names.write();
      let previous = self.definitions.get(name).map(|d| d.value().clone());
      if let Some(existing) = &previous {
        if !self.allow_overriding {
          return Err(BeanError::DefinitionStore {
            name: name.to_owned(),
            message: format!(
              "Cannot register bean definition {:?}: there is already {:?} bound",
              definition, existing
            ),
          });
        }
        if **existing != definition {
          debug!("Overriding bean definition for bean '{}'", name);
        }
      } else {
        names.push(name.to_owned());
      }
      self.definitions.insert(name.to_owned(), Arc::new(definition));
      previous.is_some()
    };

    if replaced {
      self.reset(name);
    }
    Ok(replaced)
  }

  /// Removes the raw definition and any cached merged form of `name` and its children.
  pub fn remove(&self, name: &str) -> Result<Arc<BeanDefinition>> {
    let removed = {
      let mut names = self.names.write();
      let removed = self.definitions.remove(name).map(|(_, d)| d);
      if removed.is_some() {
        names.retain(|n| n != name);
      }
      removed
    };
    match removed {
      Some(definition) => {
        self.reset(name);
        Ok(definition)
      }
      None => Err(BeanError::NoSuchDefinition { name: name.to_owned() }),
    }
  }

  pub fn definition(&self, name: &str) -> Option<Arc<BeanDefinition>> {
    self.definitions.get(name).map(|d| d.value().clone())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.definitions.contains_key(name)
  }

  /// Definition names in registration order.
  pub fn names(&self) -> Vec<String> {
    self.names.read().clone()
  }

  pub fn len(&self) -> usize {
    self.definitions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.definitions.is_empty()
  }

  /// Returns the merged definition for the top-level bean `name`.
  pub fn merged(&self, name: &str) -> Result<Arc<MergedDefinition>> {
    if let Some(cached) = self.cached(name) {
      return Ok(cached);
    }
    let _guard = self.merge_lock.lock();
    let definition = self
      .definition(name)
      .ok_or_else(|| BeanError::NoSuchDefinition { name: name.to_owned() })?;
    let mut chain = Vec::new();
    self.merge_locked(name, &definition, None, &mut chain)
  }

  /// Merges an inner bean definition in the context of the bean containing it.
  /// The result is never cached.
  pub fn merge_inner(
    &self,
    name: &str,
    definition: &BeanDefinition,
    containing: &MergedDefinition,
  ) -> Result<Arc<MergedDefinition>> {
    let _guard = self.merge_lock.lock();
    let mut chain = Vec::new();
    self.merge_locked(name, definition, Some(containing), &mut chain)
  }

  /// Marks the merged form of `name` and of all definitions inheriting from it stale.
  pub fn invalidate(&self, name: &str) {
    self.reset(name);
  }

  /// Records that `name` is about to be built for the first time.
  pub fn mark_as_created(&self, name: &str) {
    if self.already_created.contains(name) {
      return;
    }
    let _guard = self.merge_lock.lock();
    if self.already_created.insert(name.to_owned()) {
      // Re-merge on the actual creation in case metadata changed meanwhile.
      if let Some((_, merged)) = self.merged.remove(name) {
        merged.mark_stale();
      }
    }
  }

  /// Forgets the creation mark of `name` after a failed attempt.
  pub fn cleanup_after_failure(&self, name: &str) {
    self.already_created.remove(name);
  }

  pub fn has_been_created(&self, name: &str) -> bool {
    self.already_created.contains(name)
  }

  pub fn has_creation_started(&self) -> bool {
    !self.already_created.is_empty()
  }

  pub fn is_eligible_for_metadata_caching(&self, name: &str) -> bool {
    self.cache_bean_metadata || self.already_created.contains(name)
  }

  pub fn cache_bean_metadata(&self) -> bool {
    self.cache_bean_metadata
  }

  /// Marks every merged definition of a not-yet-created bean stale.
  pub fn clear_metadata_cache(&self) {
    let _guard = self.merge_lock.lock();
    self.merged.retain(|name, merged| {
      if self.already_created.contains(name) {
        true
      } else {
        merged.mark_stale();
        false
      }
    });
  }

  fn cached(&self, name: &str) -> Option<Arc<MergedDefinition>> {
    self
      .merged
      .get(name)
      .map(|m| m.value().clone())
      .filter(|m| !m.is_stale())
  }

  fn merge_locked(
    &self,
    name: &str,
    definition: &BeanDefinition,
    containing: Option<&MergedDefinition>,
    chain: &mut Vec<String>,
  ) -> Result<Arc<MergedDefinition>> {
    if containing.is_none() {
      if let Some(cached) = self.cached(name) {
        return Ok(cached);
      }
    }
    chain.push(name.to_owned());

    let mut resolved = match definition.parent_name() {
      None => definition.clone(),
      Some(parent) => {
        let parent = self.aliases.canonical_name(parent);
        if parent == name {
          return Err(BeanError::DefinitionStore {
            name: name.to_owned(),
            message: format!("Parent name '{parent}' is equal to bean name '{name}'"),
          });
        }
        if chain.contains(&parent) {
          return Err(BeanError::DefinitionStore {
            name: name.to_owned(),
            message: format!("Circular parent definition chain: {} -> {}", chain.join(" -> "), parent),
          });
        }
        let parent_definition = self.definition(&parent).ok_or_else(|| BeanError::DefinitionStore {
          name: name.to_owned(),
          message: format!("Could not resolve parent bean definition '{parent}'"),
        })?;
        let parent_merged = self.merge_locked(&parent, &parent_definition, None, chain)?;
        let mut resolved = parent_merged.definition().clone();
        resolved.override_from(definition);
        resolved
      }
    };

    let mut scope = resolved.scope().cloned().unwrap_or(Scope::Singleton);
    if let Some(outer) = containing {
      if !outer.is_singleton() && scope == Scope::Singleton {
        scope = outer.scope().clone();
      }
    }
    if !resolved.is_abstract() && resolved.construction_strategy().is_none() {
      return Err(BeanError::DefinitionStore {
        name: name.to_owned(),
        message: "no supplier, factory method or constructor specified".to_owned(),
      });
    }
    resolved.set_scope(scope.clone());

    let merged = Arc::new(MergedDefinition::new(resolved, scope));
    if containing.is_none() && self.is_eligible_for_metadata_caching(name) {
      trace!("Caching merged bean definition for '{}'", name);
      self.merged.insert(name.to_owned(), merged.clone());
    }
    chain.pop();
    Ok(merged)
  }

  fn reset(&self, name: &str) {
    let _guard = self.merge_lock.lock();
    let mut pending = vec![name.to_owned()];
    let mut seen = Vec::new();
    while let Some(current) = pending.pop() {
      if seen.contains(&current) {
        continue;
      }
      if let Some((_, merged)) = self.merged.remove(&current) {
        merged.mark_stale();
      }
      for entry in self.definitions.iter() {
        let inherits = entry
          .value()
          .parent_name()
          .map(|p| self.aliases.canonical_name(p) == current)
          .unwrap_or(false);
        if inherits {
          pending.push(entry.key().clone());
        }
      }
      seen.push(current);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store() -> DefinitionStore {
    DefinitionStore::new(Arc::new(AliasRegistry::default()), true, true)
  }

  #[test]
  fn unset_scope_defaults_to_singleton() {
    let store = store();
    store.register("a", BeanDefinition::new().with_supplier(|| Ok(1u8))).unwrap();
    assert_eq!(store.merged("a").unwrap().scope(), &Scope::Singleton);
  }

  #[test]
  fn missing_parent_is_reported() {
    let store = store();
    store.register("child", BeanDefinition::child_of("ghost")).unwrap();
    assert!(matches!(store.merged("child"), Err(BeanError::DefinitionStore { .. })));
  }

  #[test]
  fn parent_cycles_are_rejected() {
    let store = store();
    store.register("a", BeanDefinition::child_of("b")).unwrap();
    store.register("b", BeanDefinition::child_of("a")).unwrap();
    assert!(matches!(store.merged("a"), Err(BeanError::DefinitionStore { .. })));
  }

  #[test]
  fn inner_beans_of_prototypes_are_not_singletons() {
    let store = store();
    store
      .register(
        "outer",
        BeanDefinition::new()
          .with_supplier(|| Ok(0u8))
          .with_scope(Scope::Prototype),
      )
      .unwrap();
    let outer = store.merged("outer").unwrap();
    let inner = BeanDefinition::new().with_supplier(|| Ok(1u8));
    let merged = store.merge_inner("(inner bean)#outer#x", &inner, &outer).unwrap();
    assert!(merged.is_prototype());
  }

  #[test]
  fn overriding_can_be_forbidden() {
    let store = DefinitionStore::new(Arc::new(AliasRegistry::default()), false, true);
    store.register("a", BeanDefinition::new().with_supplier(|| Ok(1u8))).unwrap();
    let err = store
      .register("a", BeanDefinition::new().with_supplier(|| Ok(2u8)))
      .unwrap_err();
    assert!(matches!(err, BeanError::DefinitionStore { .. }));
    assert_eq!(store.names(), vec!["a".to_owned()]);
  }

  #[test]
  fn uncached_metadata_is_remerged_until_created() {
    let store = DefinitionStore::new(Arc::new(AliasRegistry::default()), true, false);
    store.register("a", BeanDefinition::new().with_supplier(|| Ok(1u8))).unwrap();
    let first = store.merged("a").unwrap();
    let second = store.merged("a").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(*first, *second);

    store.mark_as_created("a");
    let third = store.merged("a").unwrap();
    assert!(Arc::ptr_eq(&third, &store.merged("a").unwrap()));
  }
}
