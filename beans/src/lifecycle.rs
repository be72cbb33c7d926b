//! The creation lifecycle: resolve, instantiate, expose early, populate,
//! initialize, reconcile and register for disposal.

use crate::core::{same_instance, Arguments, Bean, CreationContext};
use crate::definition::{ConstructionStrategy, MergedDefinition, Scope, Value};
use crate::disposal::{DisposableBean, DisposableBeanAdapter};
use crate::error::{BeanError, Result};
use crate::factory::BeanFactory;
use crate::processor::BeanPostProcessor;
use crate::singleton::{Created, EarlyFactory};

use std::sync::Arc;

use tracing::{debug, trace};

impl BeanFactory {
  pub(crate) fn do_get_bean(&self, name: &str, args: Option<Arguments>, ctx: &CreationContext) -> Result<Bean> {
    let bean_name = self.canonical_name(name);

    if args.is_none() {
      if let Some(shared) = self.registry.lookup(&bean_name, true)? {
        if self.registry.is_singleton_currently_in_creation(&bean_name) {
          trace!(
            "Returning eagerly cached instance of singleton bean '{}' that is not fully initialized yet - a consequence of a circular reference",
            bean_name
          );
        } else {
          trace!("Returning cached instance of singleton bean '{}'", bean_name);
        }
        return Ok(shared);
      }
    }

    if ctx.is_prototype_in_creation(&bean_name) {
      return Err(BeanError::in_creation(bean_name));
    }

    self.definitions.mark_as_created(&bean_name);
    let result = self.create_in_scope(&bean_name, args, ctx);
    if result.is_err() {
      self.definitions.cleanup_after_failure(&bean_name);
    }
    if !self.definitions.cache_bean_metadata() {
      self.definitions.invalidate(&bean_name);
    }
    result
  }

  fn create_in_scope(&self, name: &str, args: Option<Arguments>, ctx: &CreationContext) -> Result<Bean> {
    let merged = self.definitions.merged(name)?;
    if merged.is_abstract() {
      return Err(BeanError::IsAbstract { name: name.to_owned() });
    }
    self.resolve_depends_on(name, &merged, ctx)?;

    match merged.scope() {
      Scope::Singleton => self
        .registry
        .get_or_create(name, ctx, || self.create_bean(name, &merged, args, ctx)),
      Scope::Prototype => {
        let _guard = ctx.enter_prototype(name);
        self.create_bean(name, &merged, args, ctx).map(|created| created.bean)
      }
      Scope::Custom(scope_name) => {
        let scope = self.scope_for(name, scope_name)?;
        let mut factory = || -> Result<Created> {
          let _guard = ctx.enter_prototype(name);
          self.create_bean(name, &merged, args.clone(), ctx)
        };
        scope.get(name, &mut factory)
      }
    }
  }

  /// Creates the declared depends-on beans of `name` first.
  fn resolve_depends_on(&self, name: &str, merged: &MergedDefinition, ctx: &CreationContext) -> Result<()> {
    for dep in merged.depends_on() {
      let dep = self.canonical_name(dep);
      if self.registry.is_dependent(name, &dep) {
        return Err(BeanError::CurrentlyInCreation {
          name: name.to_owned(),
          message: format!("Circular depends-on relationship between '{name}' and '{dep}'"),
        });
      }
      self.registry.register_dependency(&dep, name);
      match self.do_get_bean(&dep, None, ctx) {
        Ok(_) => {}
        Err(BeanError::NoSuchDefinition { name: missing }) if missing == dep => {
          return Err(BeanError::creation(
            name,
            format!("'{name}' depends on missing bean '{missing}'"),
          ));
        }
        Err(err) => return Err(BeanError::wrap(name, err)),
      }
    }
    Ok(())
  }

  /// Builds one instance of `name` through every lifecycle phase.
  pub(crate) fn create_bean(
    &self,
    name: &str,
    merged: &MergedDefinition,
    args: Option<Arguments>,
    ctx: &CreationContext,
  ) -> Result<Created> {
    trace!("Creating instance of bean '{}'", name);
    let processors = self.processors();

    if let Some(bean) = self.resolve_before_instantiation(name, merged, &processors)? {
      return Ok(Created::new(bean));
    }

    let raw = self.instantiate(name, merged, args, ctx)?;

    merged
      .post_process_once(|| {
        processors
          .iter()
          .try_for_each(|p| p.post_process_definition(merged, name))
      })
      .map_err(|err| BeanError::creation_caused_by(name, "Post-processing of merged bean definition failed", err))?;

    let early_exposure = merged.is_singleton()
      && self.config.allow_circular_references
      && self.registry.is_singleton_currently_in_creation(name);
    if early_exposure {
      self.registry.add_early_factory(name, early_factory(name, &raw, &processors));
    }

    let exposed = self
      .populate(name, merged, &raw, ctx)
      .and_then(|()| self.initialize(name, merged, raw.clone(), &processors))
      .map_err(|err| BeanError::wrap(name, err))?;

    let exposed = if early_exposure {
      self.reconcile_early_reference(name, &raw, exposed)?
    } else {
      exposed
    };

    let disposal = if merged.is_prototype() {
      None
    } else {
      DisposableBeanAdapter::new(name, raw, &processors, merged.destroy_method().cloned())
        .map(|adapter| Arc::new(adapter) as Arc<dyn DisposableBean>)
    };
    trace!("Finished creating instance of bean '{}'", name);
    Ok(Created {
      bean: exposed,
      disposal,
    })
  }

  fn resolve_before_instantiation(
    &self,
    name: &str,
    merged: &MergedDefinition,
    processors: &[Arc<dyn BeanPostProcessor>],
  ) -> Result<Option<Bean>> {
    for processor in processors {
      let shortcut = processor
        .before_instantiation(merged, name)
        .map_err(|err| BeanError::creation_caused_by(name, "BeanPostProcessor before instantiation of bean failed", err))?;
      if let Some(bean) = shortcut {
        return self.apply_after_initialization(name, bean, processors).map(Some);
      }
    }
    Ok(None)
  }

  fn instantiate(
    &self,
    name: &str,
    merged: &MergedDefinition,
    args: Option<Arguments>,
    ctx: &CreationContext,
  ) -> Result<Bean> {
    let strategy = merged
      .strategy()
      .cloned()
      .ok_or_else(|| BeanError::creation(name, "No supplier, factory method or constructor specified"))?;

    match strategy {
      ConstructionStrategy::Supplier(supplier) => {
        supplier().map_err(|err| BeanError::creation_caused_by(name, "Instantiation of bean failed", err))
      }
      ConstructionStrategy::FactoryMethod { factory_bean, method } => {
        let factory_name = self.canonical_name(&factory_bean);
        if factory_name == name {
          return Err(BeanError::creation(
            name,
            "factory-bean reference points back to the same bean definition",
          ));
        }
        let factory = self
          .do_get_bean(&factory_name, None, ctx)
          .map_err(|err| BeanError::wrap(name, err))?;
        self.registry.register_dependency(&factory_name, name);
        let args = self.resolve_arguments(name, merged, args, ctx)?;
        method(&factory, args).map_err(|err| {
          BeanError::creation_caused_by(
            name,
            format!("Instantiation of bean through factory method of '{factory_name}' failed"),
            err,
          )
        })
      }
      ConstructionStrategy::Constructor(constructor) => {
        let args = self.resolve_arguments(name, merged, args, ctx)?;
        constructor(args).map_err(|err| BeanError::creation_caused_by(name, "Instantiation of bean failed", err))
      }
    }
  }

  fn resolve_arguments(
    &self,
    name: &str,
    merged: &MergedDefinition,
    explicit: Option<Arguments>,
    ctx: &CreationContext,
  ) -> Result<Arguments> {
    if let Some(explicit) = explicit {
      return Ok(explicit);
    }
    let mut values = Vec::with_capacity(merged.constructor_args().len());
    for (index, value) in merged.constructor_args().iter().enumerate() {
      let label = format!("constructor argument #{index}");
      match self.resolve_value(name, merged, &label, value, ctx)? {
        Some(bean) => values.push(bean),
        None => {
          return Err(BeanError::creation(
            name,
            format!("Unsatisfied dependency expressed through {label}"),
          ))
        }
      }
    }
    Ok(Arguments::new(values))
  }

  fn populate(&self, name: &str, merged: &MergedDefinition, raw: &Bean, ctx: &CreationContext) -> Result<()> {
    if merged.properties().is_empty() {
      return Ok(());
    }
    let setter = merged
      .property_setter()
      .cloned()
      .ok_or_else(|| BeanError::creation(name, "Bean has property values but no property setter"))?;

    for property in merged.properties() {
      let label = format!("bean property '{}'", property.name);
      let Some(value) = self.resolve_value(name, merged, &label, &property.value, ctx)? else {
        continue;
      };
      setter(raw, &property.name, value).map_err(|err| {
        BeanError::creation_caused_by(name, format!("Error setting property value '{}'", property.name), err)
      })?;
    }
    Ok(())
  }

  /// Resolves one property or constructor-argument value of bean `outer`.
  /// `None` means an optional reference that could not be satisfied.
  fn resolve_value(
    &self,
    outer: &str,
    outer_merged: &MergedDefinition,
    label: &str,
    value: &Value,
    ctx: &CreationContext,
  ) -> Result<Option<Bean>> {
    match value {
      Value::Literal(bean) => Ok(Some(bean.clone())),
      Value::Ref(target) => {
        let bean = self.do_get_bean(target, None, ctx).map_err(|err| {
          BeanError::creation_caused_by(
            outer,
            format!("Cannot resolve reference to bean '{target}' while setting {label}"),
            err,
          )
        })?;
        self.registry.register_dependency(&self.canonical_name(target), outer);
        Ok(Some(bean))
      }
      Value::OptionalRef(target) => match self.do_get_bean(target, None, ctx) {
        Ok(bean) => {
          self.registry.register_dependency(&self.canonical_name(target), outer);
          Ok(Some(bean))
        }
        Err(BeanError::NoSuchDefinition { .. }) => {
          trace!("Skipping optional reference to missing bean '{}' of bean '{}'", target, outer);
          Ok(None)
        }
        Err(err) => {
          debug!("Skipping optional reference to bean '{}' of bean '{}': {}", target, outer, err);
          self.registry.on_suppressed(err);
          Ok(None)
        }
      },
      Value::Inner(definition) => {
        let inner_name = format!("(inner bean)#{outer}#{label}");
        let merged = self
          .definitions
          .merge_inner(&inner_name, definition, outer_merged)
          .map_err(|err| BeanError::wrap(outer, err))?;
        self.registry.register_containment(outer, &inner_name);
        let created = self
          .resolve_depends_on(&inner_name, &merged, ctx)
          .and_then(|()| self.create_bean(&inner_name, &merged, None, ctx))
          .map_err(|err| {
            BeanError::creation_caused_by(
              outer,
              format!("Cannot create inner bean '{inner_name}' while setting {label}"),
              err,
            )
          })?;
        if merged.is_singleton() {
          if let Some(disposal) = created.disposal {
            self.registry.register_disposable_bean(&inner_name, disposal);
          }
        }
        Ok(Some(created.bean))
      }
    }
  }

  fn initialize(
    &self,
    name: &str,
    merged: &MergedDefinition,
    bean: Bean,
    processors: &[Arc<dyn BeanPostProcessor>],
  ) -> Result<Bean> {
    let mut current = bean;
    for processor in processors {
      current = processor
        .after_properties_set(current, name)
        .map_err(|err| BeanError::creation_caused_by(name, "BeanPostProcessor after properties set failed", err))?;
    }
    if let Some(init) = merged.init_method() {
      init(&current).map_err(|err| BeanError::creation_caused_by(name, "Invocation of init method failed", err))?;
    }
    self.apply_after_initialization(name, current, processors)
  }

  fn apply_after_initialization(
    &self,
    name: &str,
    bean: Bean,
    processors: &[Arc<dyn BeanPostProcessor>],
  ) -> Result<Bean> {
    let mut current = bean;
    for processor in processors {
      current = processor
        .after_initialization(current, name)
        .map_err(|err| BeanError::creation_caused_by(name, "BeanPostProcessor after initialization failed", err))?;
    }
    Ok(current)
  }

  /// Settles which object becomes the singleton when an early reference of
  /// `name` was handed out during its own population.
  fn reconcile_early_reference(&self, name: &str, raw: &Bean, exposed: Bean) -> Result<Bean> {
    let Some(early) = self.registry.lookup(name, false)? else {
      return Ok(exposed);
    };
    if same_instance(&exposed, raw) {
      return Ok(early);
    }
    if self.config.allow_raw_injection_despite_wrapping || !self.registry.has_dependents(name) {
      return Ok(exposed);
    }
    let actual: Vec<String> = self
      .registry
      .dependents_of(name)
      .into_iter()
      .filter(|dependent| self.definitions.has_been_created(dependent))
      .collect();
    if actual.is_empty() {
      return Ok(exposed);
    }
    Err(BeanError::CurrentlyInCreation {
      name: name.to_owned(),
      message: format!(
        "Bean with name '{}' has been injected into other beans [{}] in its raw version as part of a circular reference, \
         but has eventually been wrapped. This means that said other beans do not use the final version of the bean.",
        name,
        actual.join(", ")
      ),
    })
  }
}

fn early_factory(name: &str, raw: &Bean, processors: &[Arc<dyn BeanPostProcessor>]) -> EarlyFactory {
  let name = name.to_owned();
  let raw = raw.clone();
  let processors = processors.to_vec();
  Arc::new(move || {
    processors.iter().try_fold(raw.clone(), |current, processor| {
      processor
        .early_reference(current, &name)
        .map_err(|err| BeanError::creation_caused_by(name.as_str(), "Obtaining early bean reference failed", err))
    })
  })
}
