//! Alias name to canonical name mapping.

use crate::error::{BeanError, Result};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

/// A registry of aliases. An alias may point at another alias; lookups follow
/// the chain to the canonical name. Chains are guaranteed loop-free at
/// registration time.
pub struct AliasRegistry {
  aliases: DashMap<String, String>,
  // Serializes registration so that the circularity check and the insert are atomic.
  registration: Mutex<()>,
  allow_overriding: bool,
}

impl AliasRegistry {
  pub fn new(allow_overriding: bool) -> Self {
    Self {
      aliases: DashMap::new(),
      registration: Mutex::new(()),
      allow_overriding,
    }
  }

  /// Registers `alias` for `name`.
  ///
  /// Registering an alias equal to the name removes any alias of that
  /// spelling. Re-registering an existing alias for the same name is a no-op.
  pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
    let _guard = self.registration.lock();
    if alias == name {
      self.aliases.remove(alias);
      debug!("Alias definition '{}' ignored since it points to same name", alias);
      return Ok(());
    }
    if let Some(registered) = self.target_of(alias) {
      if registered == name {
        return Ok(());
      }
      if !self.allow_overriding {
        return Err(BeanError::AliasOverride {
          alias: alias.to_owned(),
          name: name.to_owned(),
          existing: registered,
        });
      }
      debug!(
        "Overriding alias '{}' definition for registered name '{}' with new target name '{}'",
        alias, registered, name
      );
    }
    self.check_for_alias_circle(name, alias)?;
    self.aliases.insert(alias.to_owned(), name.to_owned());
    trace!("Alias definition '{}' registered for name '{}'", alias, name);
    Ok(())
  }

  pub fn remove_alias(&self, alias: &str) -> Result<()> {
    let _guard = self.registration.lock();
    match self.aliases.remove(alias) {
      Some(_) => Ok(()),
      None => Err(BeanError::NoSuchAlias {
        alias: alias.to_owned(),
      }),
    }
  }

  pub fn is_alias(&self, name: &str) -> bool {
    self.aliases.contains_key(name)
  }

  /// Returns `true` if `alias` resolves, directly or through other aliases, to `name`.
  pub fn has_alias(&self, name: &str, alias: &str) -> bool {
    let mut current = alias.to_owned();
    // Bounded by the number of aliases in case a chain was corrupted.
    for _ in 0..=self.aliases.len() {
      match self.target_of(&current) {
        Some(target) if target == name => return true,
        Some(target) => current = target,
        None => return false,
      }
    }
    false
  }

  /// All aliases that resolve to `name`, including aliases of aliases.
  pub fn aliases_of(&self, name: &str) -> Vec<String> {
    let snapshot: Vec<(String, String)> = self
      .aliases
      .iter()
      .map(|entry| (entry.key().clone(), entry.value().clone()))
      .collect();
    let mut result = Vec::new();
    let mut pending = vec![name.to_owned()];
    while let Some(target) = pending.pop() {
      for (alias, registered) in &snapshot {
        if *registered == target && !result.contains(alias) {
          result.push(alias.clone());
          pending.push(alias.clone());
        }
      }
    }
    result
  }

  /// Follows the alias chain starting at `name` to the canonical name.
  pub fn canonical_name(&self, name: &str) -> String {
    let mut canonical = name.to_owned();
    for _ in 0..=self.aliases.len() {
      match self.target_of(&canonical) {
        Some(resolved) => canonical = resolved,
        None => break,
      }
    }
    canonical
  }

  pub fn len(&self) -> usize {
    self.aliases.len()
  }

  pub fn is_empty(&self) -> bool {
    self.aliases.is_empty()
  }

  fn check_for_alias_circle(&self, name: &str, alias: &str) -> Result<()> {
    if self.has_alias(alias, name) {
      return Err(BeanError::AliasCircularity {
        alias: alias.to_owned(),
        name: name.to_owned(),
      });
    }
    Ok(())
  }

  fn target_of(&self, alias: &str) -> Option<String> {
    self.aliases.get(alias).map(|entry| entry.value().clone())
  }
}

impl Default for AliasRegistry {
  fn default() -> Self {
    Self::new(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn chains_resolve_to_the_canonical_name() {
    let registry = AliasRegistry::default();
    registry.register_alias("service", "svc").unwrap();
    registry.register_alias("svc", "s").unwrap();

    assert_eq!(registry.canonical_name("s"), "service");
    assert_eq!(registry.canonical_name("service"), "service");
    assert!(registry.has_alias("service", "s"));

    let mut aliases = registry.aliases_of("service");
    aliases.sort();
    assert_eq!(aliases, vec!["s".to_owned(), "svc".to_owned()]);
  }

  #[test]
  fn cycles_are_rejected() {
    let registry = AliasRegistry::default();
    registry.register_alias("a", "b").unwrap();
    registry.register_alias("b", "c").unwrap();

    let err = registry.register_alias("c", "a").unwrap_err();
    assert!(matches!(err, BeanError::AliasCircularity { .. }));
    assert_eq!(registry.canonical_name("c"), "a");
  }

  #[test]
  fn overriding_can_be_forbidden() {
    let registry = AliasRegistry::new(false);
    registry.register_alias("one", "alias").unwrap();
    registry.register_alias("one", "alias").unwrap();

    let err = registry.register_alias("two", "alias").unwrap_err();
    assert!(matches!(err, BeanError::AliasOverride { ref existing, .. } if existing == "one"));
  }

  #[test]
  fn alias_equal_to_name_removes_it() {
    let registry = AliasRegistry::default();
    registry.register_alias("other", "x").unwrap();
    registry.register_alias("x", "x").unwrap();
    assert!(!registry.is_alias("x"));
    assert!(matches!(
      registry.remove_alias("x"),
      Err(BeanError::NoSuchAlias { .. })
    ));
  }
}
