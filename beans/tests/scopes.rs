mod common;

use common::{recorded_node, Node, Recorder};
use fibre_beans::{same_instance, BeanDefinition, BeanError, BeanFactory, CustomScope, MapScope, Scope};
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn request_scoped(recorder: &Recorder) -> (BeanFactory, Arc<MapScope>) {
  let scope = Arc::new(MapScope::with_id("request-1"));
  let factory = BeanFactory::builder()
    .scope("request", scope.clone())
    .definition("r", recorded_node("r", None, recorder).with_scope(Scope::parse("request")))
    .build()
    .unwrap();
  (factory, scope)
}

#[test]
fn test_prototypes_are_fresh_and_never_destroyed_by_the_factory() {
  // Arrange
  let recorder = Recorder::new();
  let factory = BeanFactory::new();
  factory
    .register_definition("p", recorded_node("p", None, &recorder).with_scope(Scope::Prototype))
    .unwrap();

  // Act
  let first = factory.get_bean("p").unwrap();
  let second = factory.get_bean("p").unwrap();
  factory.destroy_singletons();

  // Assert
  assert!(!same_instance(&first, &second));
  assert!(recorder.events().is_empty());
  assert_eq!(factory.registry().singleton_count(), 0);
}

#[test]
fn test_custom_scope_caches_until_reset() {
  // Arrange
  let recorder = Recorder::new();
  let (factory, scope) = request_scoped(&recorder);

  // Act
  let first = factory.get_bean("r").unwrap();
  let second = factory.get_bean("r").unwrap();
  scope.reset();
  let third = factory.get_bean("r").unwrap();

  // Assert
  assert!(same_instance(&first, &second));
  assert!(!same_instance(&first, &third));
  assert_eq!(recorder.events(), vec!["r"]);
  assert!(scope.contains("r"));
  assert!(!factory.registry().contains_singleton("r"));
}

#[test]
fn test_scoped_bean_can_be_destroyed_explicitly() {
  // Arrange
  let recorder = Recorder::new();
  let (factory, scope) = request_scoped(&recorder);
  factory.get_bean("r").unwrap();

  // Act
  factory.destroy_scoped_bean("r").unwrap();
  scope.reset();

  // Assert
  assert_eq!(recorder.events(), vec!["r"]);
  assert!(scope.is_empty());
}

#[test]
#[serial]
fn test_concurrent_scoped_creation_destroys_the_unbound_instance() {
  common::init_tracing();
  // Arrange: two requests build "req" at the same time.
  let recorder = Recorder::new();
  let scope = Arc::new(MapScope::with_id("request-2"));
  let inside = Arc::new(Barrier::new(2));
  let builds = Arc::new(AtomicUsize::new(0));
  let destroyed = recorder.clone();
  let definition = {
    let inside = inside.clone();
    let builds = builds.clone();
    BeanDefinition::new()
      .with_supplier(move || {
        let name = ["0", "1"][builds.fetch_add(1, Ordering::SeqCst)];
        inside.wait();
        Ok(Node::new(name))
      })
      .with_destroy_method(move |node: &Node| {
        destroyed.record(node.name);
        Ok(())
      })
      .with_scope(Scope::parse("request"))
  };
  let factory = Arc::new(
    BeanFactory::builder()
      .scope("request", scope.clone())
      .definition("req", definition)
      .build()
      .unwrap(),
  );

  // Act
  let handles: Vec<_> = (0..2)
    .map(|_| {
      let factory = factory.clone();
      thread::spawn(move || factory.get_typed::<Node>("req").unwrap())
    })
    .collect();
  let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
  let discarded = recorder.events();
  scope.reset();

  // Assert
  assert!(Arc::ptr_eq(&results[0], &results[1]));
  let bound = results[0].name;
  let unbound = if bound == "0" { "1" } else { "0" };
  assert_eq!(discarded, vec![unbound]);
  assert_eq!(recorder.events(), vec![unbound, bound]);
}

#[test]
fn test_destroying_a_singleton_as_scoped_bean_fails() {
  let factory = BeanFactory::new();
  factory
    .register_definition("s", BeanDefinition::new().with_supplier(|| Ok(Node::new("s"))))
    .unwrap();

  let err = factory.destroy_scoped_bean("s").unwrap_err();

  assert!(matches!(err, BeanError::Scope { ref scope, .. } if scope == "singleton"));
}

#[test]
fn test_unknown_scope_is_reported() {
  let factory = BeanFactory::new();
  factory
    .register_definition(
      "session-bean",
      BeanDefinition::new()
        .with_supplier(|| Ok(Node::new("session-bean")))
        .with_scope(Scope::parse("session")),
    )
    .unwrap();

  let err = factory.get_bean("session-bean").unwrap_err();

  assert!(matches!(err, BeanError::Scope { ref scope, .. } if scope == "session"));
  assert!(err.to_string().contains("No Scope registered for scope name 'session'"));
}

#[test]
fn test_builtin_scope_names_are_reserved() {
  let from_builder = BeanFactory::builder()
    .scope(Scope::SINGLETON, Arc::new(MapScope::new()))
    .build();
  let factory = BeanFactory::new();
  let registered = factory.register_scope(Scope::PROTOTYPE, Arc::new(MapScope::new()));

  assert!(matches!(from_builder, Err(BeanError::Scope { .. })));
  assert!(matches!(registered, Err(BeanError::Scope { .. })));
  assert!(factory.registered_scope_names().is_empty());
}

#[test]
fn test_registered_scope_exposes_its_conversation_id() {
  let recorder = Recorder::new();
  let (factory, _scope) = request_scoped(&recorder);

  let scope = factory.registered_scope("request").unwrap();

  assert_eq!(scope.conversation_id().as_deref(), Some("request-1"));
  assert_eq!(factory.registered_scope_names(), vec!["request".to_owned()]);
  assert!(!factory.is_singleton("r").unwrap());
  assert!(!factory.is_prototype("r").unwrap());
}

#[test]
fn test_scope_parsing() {
  assert_eq!(Scope::parse("singleton"), Scope::Singleton);
  assert_eq!(Scope::parse("prototype"), Scope::Prototype);
  assert_eq!(Scope::parse("request"), Scope::Custom("request".to_owned()));
  assert_eq!(Scope::Custom("request".to_owned()).to_string(), "request");
}
