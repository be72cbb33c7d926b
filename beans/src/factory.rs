//! The `BeanFactory`: the public face of the runtime.

use crate::alias::AliasRegistry;
use crate::builder::BeanFactoryBuilder;
use crate::config::FactoryConfig;
use crate::core::{downcast, Arguments, Bean, CreationContext};
use crate::definition::{BeanDefinition, MergedDefinition, Scope};
use crate::disposal::{DisposableBean, DisposableBeanAdapter};
use crate::error::{BeanError, Result};
use crate::processor::BeanPostProcessor;
use crate::scope::CustomScope;
use crate::singleton::{SingletonRegistry, SingletonState};
use crate::store::DefinitionStore;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

/// Builds, caches and destroys beans from registered definitions.
///
/// The factory is thread-safe. Definitions, aliases, scopes and
/// post-processors may be registered at any time, although changing them while
/// beans are being created only affects creations that start afterwards.
pub struct BeanFactory {
  pub(crate) config: FactoryConfig,
  pub(crate) aliases: Arc<AliasRegistry>,
  pub(crate) definitions: DefinitionStore,
  pub(crate) registry: SingletonRegistry,
  processors: RwLock<Vec<Arc<dyn BeanPostProcessor>>>,
  scopes: DashMap<String, Arc<dyn CustomScope>>,
}

impl BeanFactory {
  /// Creates an empty factory with the default configuration.
  pub fn new() -> Self {
    Self::with_config(FactoryConfig::default())
  }

  pub fn with_config(config: FactoryConfig) -> Self {
    let aliases = Arc::new(AliasRegistry::new(config.allow_alias_overriding));
    let definitions = DefinitionStore::new(
      aliases.clone(),
      config.allow_definition_overriding,
      config.cache_bean_metadata,
    );
    let registry = SingletonRegistry::with_suppressed_limit(config.suppressed_error_limit);
    Self {
      config,
      aliases,
      definitions,
      registry,
      processors: RwLock::new(Vec::new()),
      scopes: DashMap::new(),
    }
  }

  pub fn builder() -> BeanFactoryBuilder {
    BeanFactoryBuilder::new()
  }

  pub fn config(&self) -> &FactoryConfig {
    &self.config
  }

  pub fn registry(&self) -> &SingletonRegistry {
    &self.registry
  }

  pub fn definitions(&self) -> &DefinitionStore {
    &self.definitions
  }

  pub fn aliases(&self) -> &AliasRegistry {
    &self.aliases
  }

  // --- Definitions ---

  /// Registers `definition` under `name`.
  ///
  /// Replacing a definition marks the merged forms of it and of its children
  /// stale. Instances built from the previous definition stay in place.
  pub fn register_definition(&self, name: &str, definition: BeanDefinition) -> Result<()> {
    if self.definitions.register(name, definition)? {
      debug!("Bean definition '{}' replaced, merged metadata reset", name);
    }
    Ok(())
  }

  /// Removes the definition of `name` and destroys its singleton, if any.
  pub fn remove_definition(&self, name: &str) -> Result<()> {
    let name = self.canonical_name(name);
    self.definitions.remove(&name)?;
    self.registry.destroy_singleton(&name);
    Ok(())
  }

  pub fn contains_definition(&self, name: &str) -> bool {
    self.definitions.contains(&self.canonical_name(name))
  }

  /// Definition names in registration order.
  pub fn definition_names(&self) -> Vec<String> {
    self.definitions.names()
  }

  pub fn definition_count(&self) -> usize {
    self.definitions.len()
  }

  pub fn get_merged_definition(&self, name: &str) -> Result<Arc<MergedDefinition>> {
    self.definitions.merged(&self.canonical_name(name))
  }

  pub fn invalidate_definition(&self, name: &str) {
    self.definitions.invalidate(&self.canonical_name(name));
  }

  pub fn clear_metadata_cache(&self) {
    self.definitions.clear_metadata_cache();
  }

  // --- Aliases ---

  pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
    self.aliases.register_alias(name, alias)
  }

  pub fn remove_alias(&self, alias: &str) -> Result<()> {
    self.aliases.remove_alias(alias)
  }

  pub fn aliases_of(&self, name: &str) -> Vec<String> {
    self.aliases.aliases_of(&self.canonical_name(name))
  }

  pub fn canonical_name(&self, name: &str) -> String {
    self.aliases.canonical_name(name)
  }

  // --- Extension points ---

  /// Appends a post-processor. Processors run in registration order.
  pub fn add_post_processor(&self, processor: Arc<dyn BeanPostProcessor>) {
    self.processors.write().push(processor);
  }

  pub fn post_processor_count(&self) -> usize {
    self.processors.read().len()
  }

  pub(crate) fn processors(&self) -> Vec<Arc<dyn BeanPostProcessor>> {
    self.processors.read().clone()
  }

  /// Registers a custom scope. The built-in scope names are reserved.
  pub fn register_scope(&self, name: &str, scope: Arc<dyn CustomScope>) -> Result<()> {
    if name == Scope::SINGLETON || name == Scope::PROTOTYPE {
      return Err(BeanError::Scope {
        name: name.to_owned(),
        scope: name.to_owned(),
        message: "Cannot replace existing scopes 'singleton' and 'prototype'".to_owned(),
      });
    }
    if self.scopes.insert(name.to_owned(), scope).is_some() {
      debug!("Replacing scope '{}'", name);
    }
    Ok(())
  }

  pub fn registered_scope(&self, name: &str) -> Option<Arc<dyn CustomScope>> {
    self.scopes.get(name).map(|s| s.value().clone())
  }

  pub fn registered_scope_names(&self) -> Vec<String> {
    self.scopes.iter().map(|s| s.key().clone()).collect()
  }

  // --- Retrieval ---

  /// Returns the bean named `name` (or an alias of it), creating it if needed.
  pub fn get_bean(&self, name: &str) -> Result<Bean> {
    let ctx = CreationContext::with_lock_mode(self.config.lock_mode);
    self.do_get_bean(name, None, &ctx)
  }

  /// Like [`get_bean`](Self::get_bean), with explicit arguments replacing the
  /// definition's constructor arguments when a new instance is built.
  pub fn get_bean_with_args(&self, name: &str, args: Vec<Bean>) -> Result<Bean> {
    let ctx = CreationContext::with_lock_mode(self.config.lock_mode);
    self.do_get_bean(name, Some(Arguments::new(args)), &ctx)
  }

  /// Like [`get_bean`](Self::get_bean), as part of the creation chain `ctx`.
  pub fn get_bean_in(&self, name: &str, ctx: &CreationContext) -> Result<Bean> {
    self.do_get_bean(name, None, ctx)
  }

  pub fn get_typed<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
    downcast(name, self.get_bean(name)?)
  }

  pub fn contains_bean(&self, name: &str) -> bool {
    let name = self.canonical_name(name);
    self.registry.contains_singleton(&name) || self.definitions.contains(&name)
  }

  pub fn is_singleton(&self, name: &str) -> Result<bool> {
    let name = self.canonical_name(name);
    if self.registry.contains_singleton(&name) {
      return Ok(true);
    }
    Ok(self.definitions.merged(&name)?.is_singleton())
  }

  pub fn is_prototype(&self, name: &str) -> Result<bool> {
    let name = self.canonical_name(name);
    if !self.definitions.contains(&name) && self.registry.contains_singleton(&name) {
      return Ok(false);
    }
    Ok(self.definitions.merged(&name)?.is_prototype())
  }

  /// The singleton state of `name`.
  pub fn state(&self, name: &str) -> SingletonState {
    self.registry.state(&self.canonical_name(name))
  }

  /// Returns `true` once any bean has been created by this factory.
  pub fn has_creation_started(&self) -> bool {
    self.definitions.has_creation_started()
  }

  /// Registers a fully built singleton under `name`.
  pub fn register_singleton(&self, name: &str, bean: Bean) -> Result<()> {
    self.registry.register_singleton(&self.canonical_name(name), bean)
  }

  // --- Bootstrap and teardown ---

  /// Creates every non-abstract, non-lazy singleton in registration order.
  ///
  /// If any of them fails, every singleton created so far is destroyed and
  /// the error is returned.
  pub fn preinstantiate_singletons(&self) -> Result<()> {
    trace!("Pre-instantiating singletons in {:?}", self);
    let ctx = CreationContext::with_lock_mode(self.config.bootstrap_lock_mode);
    let result = self.definitions.names().into_iter().try_for_each(|name| -> Result<()> {
      let merged = self.definitions.merged(&name)?;
      if !merged.is_abstract() && merged.is_singleton() && !merged.is_lazy_init() {
        self.do_get_bean(&name, None, &ctx)?;
      }
      Ok(())
    });
    if let Err(err) = result {
      debug!("Pre-instantiation failed, destroying singletons: {}", err);
      self.destroy_singletons();
      return Err(err);
    }
    Ok(())
  }

  /// Destroys every singleton in reverse registration order.
  pub fn destroy_singletons(&self) {
    self.registry.destroy_singletons();
  }

  pub fn destroy_singleton(&self, name: &str) {
    self.registry.destroy_singleton(&self.canonical_name(name));
  }

  /// Removes the current instance of a custom-scoped bean from its scope and destroys it.
  pub fn destroy_scoped_bean(&self, name: &str) -> Result<()> {
    let name = self.canonical_name(name);
    let merged = self.definitions.merged(&name)?;
    let Scope::Custom(scope_name) = merged.scope() else {
      return Err(BeanError::Scope {
        name: name.clone(),
        scope: merged.scope().to_string(),
        message: "Bean is not in a custom scope".to_owned(),
      });
    };
    let scope = self.scope_for(&name, scope_name)?;
    if let Some(bean) = scope.remove(&name) {
      let processors = self.processors();
      let adapter = DisposableBeanAdapter::new(&name, bean, &processors, merged.destroy_method().cloned());
      if let Some(adapter) = adapter {
        if let Err(err) = adapter.destroy() {
          warn!("Destruction of scoped bean with name '{}' threw an exception: {}", name, err);
        }
      }
    }
    Ok(())
  }

  pub(crate) fn scope_for(&self, name: &str, scope_name: &str) -> Result<Arc<dyn CustomScope>> {
    self.registered_scope(scope_name).ok_or_else(|| BeanError::Scope {
      name: name.to_owned(),
      scope: scope_name.to_owned(),
      message: format!("No Scope registered for scope name '{scope_name}'"),
    })
  }
}

impl Default for BeanFactory {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for BeanFactory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BeanFactory")
      .field("definitions", &self.definitions.names())
      .field("singletons", &self.registry.singleton_count())
      .field("post_processors", &self.post_processor_count())
      .field("scopes", &self.registered_scope_names())
      .finish()
  }
}
