use crate::config::FactoryConfig;
use crate::core::LockMode;
use crate::definition::{BeanDefinition, Scope};
use crate::error::{BeanError, Result};
use crate::factory::BeanFactory;
use crate::processor::BeanPostProcessor;
use crate::scope::CustomScope;

use core::fmt;
use std::sync::Arc;

/// A builder for creating [`BeanFactory`] instances.
pub struct BeanFactoryBuilder {
  config: FactoryConfig,
  processors: Vec<Arc<dyn BeanPostProcessor>>,
  scopes: Vec<(String, Arc<dyn CustomScope>)>,
  definitions: Vec<(String, BeanDefinition)>,
  aliases: Vec<(String, String)>,
}

impl fmt::Debug for BeanFactoryBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BeanFactoryBuilder")
      .field("config", &self.config)
      .field("processors", &self.processors.len())
      .field("scopes", &self.scopes.iter().map(|(name, _)| name).collect::<Vec<_>>())
      .field("definitions", &self.definitions.iter().map(|(name, _)| name).collect::<Vec<_>>())
      .finish_non_exhaustive()
  }
}

impl Default for BeanFactoryBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl BeanFactoryBuilder {
  pub fn new() -> Self {
    Self::from_config(FactoryConfig::default())
  }

  /// Starts from an existing configuration, e.g. one deserialized from a file.
  pub fn from_config(config: FactoryConfig) -> Self {
    Self {
      config,
      processors: Vec::new(),
      scopes: Vec::new(),
      definitions: Vec::new(),
      aliases: Vec::new(),
    }
  }

  /// Sets whether circular references between singletons are resolved
  /// through early references. Enabled by default.
  pub fn allow_circular_references(mut self, allow: bool) -> Self {
    self.config.allow_circular_references = allow;
    self
  }

  /// Sets whether a bean may be wrapped after its raw version was injected
  /// into other beans. Disabled by default.
  pub fn allow_raw_injection_despite_wrapping(mut self, allow: bool) -> Self {
    self.config.allow_raw_injection_despite_wrapping = allow;
    self
  }

  pub fn allow_definition_overriding(mut self, allow: bool) -> Self {
    self.config.allow_definition_overriding = allow;
    self
  }

  pub fn allow_alias_overriding(mut self, allow: bool) -> Self {
    self.config.allow_alias_overriding = allow;
    self
  }

  /// Sets whether merged definitions are cached before their bean is first created.
  pub fn cache_bean_metadata(mut self, cache: bool) -> Self {
    self.config.cache_bean_metadata = cache;
    self
  }

  pub fn lock_mode(mut self, mode: LockMode) -> Self {
    self.config.lock_mode = mode;
    self
  }

  /// Sets the lock policy used while pre-instantiating singletons.
  pub fn bootstrap_lock_mode(mut self, mode: LockMode) -> Self {
    self.config.bootstrap_lock_mode = mode;
    self
  }

  pub fn suppressed_error_limit(mut self, limit: usize) -> Self {
    self.config.suppressed_error_limit = limit;
    self
  }

  pub fn post_processor<P>(mut self, processor: P) -> Self
  where
    P: BeanPostProcessor + 'static,
  {
    self.processors.push(Arc::new(processor));
    self
  }

  pub fn scope(mut self, name: impl Into<String>, scope: Arc<dyn CustomScope>) -> Self {
    self.scopes.push((name.into(), scope));
    self
  }

  pub fn definition(mut self, name: impl Into<String>, definition: BeanDefinition) -> Self {
    self.definitions.push((name.into(), definition));
    self
  }

  pub fn alias(mut self, name: impl Into<String>, alias: impl Into<String>) -> Self {
    self.aliases.push((name.into(), alias.into()));
    self
  }

  /// Builds the factory, registering scopes, definitions and aliases in the
  /// order they were added.
  pub fn build(self) -> Result<BeanFactory> {
    self.validate()?;
    let factory = BeanFactory::with_config(self.config);
    for processor in self.processors {
      factory.add_post_processor(processor);
    }
    for (name, scope) in self.scopes {
      factory.register_scope(&name, scope)?;
    }
    for (name, definition) in self.definitions {
      factory.register_definition(&name, definition)?;
    }
    for (name, alias) in self.aliases {
      factory.register_alias(&name, &alias)?;
    }
    Ok(factory)
  }

  fn validate(&self) -> Result<()> {
    if let Some((name, _)) = self
      .scopes
      .iter()
      .find(|(name, _)| name == Scope::SINGLETON || name == Scope::PROTOTYPE)
    {
      return Err(BeanError::Scope {
        name: name.clone(),
        scope: name.clone(),
        message: "Cannot replace existing scopes 'singleton' and 'prototype'".to_owned(),
      });
    }
    Ok(())
  }
}
