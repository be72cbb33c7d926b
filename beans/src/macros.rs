//! Public macros for ergonomic bean resolution.

/// Resolves a bean from a factory and downcasts it to the requested type.
///
/// It panics if the bean cannot be created or is not of the requested type,
/// which makes it suitable for wiring code where a missing bean is a bug.
///
/// # Panics
///
/// This macro will panic if the bean cannot be resolved. For a non-panicking
/// version, use `factory.get_typed::<T>(name)` directly.
///
/// # Examples
///
/// ```
/// use fibre_beans::{resolve, BeanDefinition, BeanFactory};
///
/// let factory = BeanFactory::new();
/// factory
///   .register_definition("greeting", BeanDefinition::new().with_supplier(|| Ok(String::from("hello"))))
///   .unwrap();
///
/// let greeting = resolve!(factory, String, "greeting");
/// assert_eq!(*greeting, "hello");
/// ```
#[macro_export]
macro_rules! resolve {
  ($factory:expr, $type:ty, $name:expr) => {
    $factory.get_typed::<$type>($name).unwrap_or_else(|err| {
      panic!(
        "Failed to resolve required bean '{}' as {}: {}",
        $name,
        std::any::type_name::<$type>(),
        err
      )
    })
  };
}
