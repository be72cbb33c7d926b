mod common;

use common::{node, pair, Node, Pair, WrapAfterInit, WrapEarly, Wrapper};
use fibre_beans::{same_instance, BeanDefinition, BeanFactory, Scope, SingletonState};
use serial_test::serial;
use std::sync::{Arc, Barrier};
use std::thread;

fn cyclic_factory() -> BeanFactory {
  let factory = BeanFactory::new();
  factory.register_definition("a", node("a", "b")).unwrap();
  factory.register_definition("b", node("b", "a")).unwrap();
  factory
}

#[test]
fn test_property_cycle_resolves_to_final_instances() {
  common::init_tracing();
  // Arrange
  let factory = cyclic_factory();

  // Act
  let a = factory.get_bean("a").unwrap();
  let b = factory.get_bean("b").unwrap();

  // Assert
  let a_node = a.downcast_ref::<Node>().unwrap();
  let b_node = b.downcast_ref::<Node>().unwrap();
  assert!(same_instance(a_node.peer().unwrap(), &b));
  assert!(same_instance(b_node.peer().unwrap(), &a));
  assert_eq!(factory.state("a"), SingletonState::Finished);
  assert_eq!(factory.state("b"), SingletonState::Finished);
  assert_eq!(factory.registry().dependents_of("a"), vec!["b".to_owned()]);
}

#[test]
fn test_self_reference_resolves_through_early_reference() {
  let factory = BeanFactory::new();
  factory.register_definition("me", node("me", "me")).unwrap();

  let me = factory.get_bean("me").unwrap();

  let me_node = me.downcast_ref::<Node>().unwrap();
  assert!(same_instance(me_node.peer().unwrap(), &me));
}

#[test]
fn test_constructor_cycle_is_rejected() {
  // Arrange
  let factory = BeanFactory::new();
  factory.register_definition("a", pair("b")).unwrap();
  factory.register_definition("b", pair("a")).unwrap();

  // Act
  let err = factory.get_bean("a").unwrap_err();

  // Assert
  assert!(err.is_caused_by_circularity(), "unexpected error: {err}");
  assert_eq!(err.bean_name(), Some("a"));
  assert_eq!(factory.state("a"), SingletonState::Absent);
  assert_eq!(factory.state("b"), SingletonState::Absent);
  assert!(!factory.registry().is_currently_in_creation("a"));
}

#[test]
fn test_constructor_argument_resolves_to_property_cycle_member() {
  // A pair built from a node that is itself part of a property cycle.
  let factory = cyclic_factory();
  factory.register_definition("pair", pair("a")).unwrap();

  let built = factory.get_bean("pair").unwrap();

  let a = factory.get_bean("a").unwrap();
  assert!(same_instance(&built.downcast_ref::<Pair>().unwrap().other, &a));
}

#[test]
fn test_cycle_fails_when_circular_references_are_disabled() {
  // Arrange
  let factory = BeanFactory::builder()
    .allow_circular_references(false)
    .definition("a", node("a", "b"))
    .definition("b", node("b", "a"))
    .build()
    .unwrap();

  // Act
  let err = factory.get_bean("a").unwrap_err();

  // Assert
  assert!(err.is_caused_by_circularity());
  assert_eq!(factory.state("a"), SingletonState::Absent);
  assert_eq!(factory.state("b"), SingletonState::Absent);
}

#[test]
fn test_wrapping_after_raw_injection_is_rejected() {
  // Arrange: "a" is wrapped after "b" already captured its raw version.
  let factory = BeanFactory::builder()
    .post_processor(WrapAfterInit { target: "a" })
    .definition("a", node("a", "b"))
    .definition("b", node("b", "a"))
    .build()
    .unwrap();

  // Act
  let err = factory.get_bean("a").unwrap_err();

  // Assert
  assert!(err.is_caused_by_circularity());
  assert!(err.to_string().contains("has eventually been wrapped"), "unexpected error: {err}");
  assert_eq!(factory.state("a"), SingletonState::Absent);
  // "b" holds the discarded raw "a" and must not survive.
  assert_eq!(factory.state("b"), SingletonState::Absent);
}

#[test]
fn test_raw_injection_can_be_allowed_despite_wrapping() {
  // Arrange
  let factory = BeanFactory::builder()
    .allow_raw_injection_despite_wrapping(true)
    .post_processor(WrapAfterInit { target: "a" })
    .definition("a", node("a", "b"))
    .definition("b", node("b", "a"))
    .build()
    .unwrap();

  // Act
  let a = factory.get_bean("a").unwrap();
  let b = factory.get_bean("b").unwrap();

  // Assert
  let wrapper = a.downcast_ref::<Wrapper>().expect("a is wrapped");
  let raw_in_b = b.downcast_ref::<Node>().unwrap().peer().unwrap();
  assert!(same_instance(&wrapper.inner, raw_in_b));
  assert!(!same_instance(&a, raw_in_b));
}

#[test]
fn test_early_reference_wrapper_is_adopted_as_final_instance() {
  // Arrange
  let factory = BeanFactory::builder()
    .post_processor(WrapEarly { target: "a" })
    .definition("a", node("a", "b"))
    .definition("b", node("b", "a"))
    .build()
    .unwrap();

  // Act
  let a = factory.get_bean("a").unwrap();
  let b = factory.get_bean("b").unwrap();

  // Assert
  let wrapper = a.downcast_ref::<Wrapper>().expect("early wrapper adopted");
  assert!(wrapper.inner.downcast_ref::<Node>().is_some());
  assert!(same_instance(b.downcast_ref::<Node>().unwrap().peer().unwrap(), &a));
}

#[test]
fn test_prototype_self_reference_is_rejected() {
  let factory = BeanFactory::new();
  factory
    .register_definition("p", node("p", "p").with_scope(Scope::Prototype))
    .unwrap();

  let err = factory.get_bean("p").unwrap_err();

  assert!(err.is_caused_by_circularity());
}

#[test]
fn test_prototype_may_reference_a_singleton_in_a_cycle() {
  // The singleton is early-exposed, the prototype is built fresh.
  let factory = BeanFactory::new();
  factory.register_definition("single", node("single", "proto")).unwrap();
  factory
    .register_definition("proto", node("proto", "single").with_scope(Scope::Prototype))
    .unwrap();

  let single = factory.get_bean("single").unwrap();

  let proto = single.downcast_ref::<Node>().unwrap().peer().unwrap();
  let back = proto.downcast_ref::<Node>().unwrap().peer().unwrap();
  assert!(same_instance(back, &single));
}

#[test]
fn test_depends_on_cycle_is_rejected() {
  // Arrange
  let factory = BeanFactory::new();
  factory
    .register_definition("a", BeanDefinition::new().with_supplier(|| Ok(1u8)).with_depends_on("b"))
    .unwrap();
  factory
    .register_definition("b", BeanDefinition::new().with_supplier(|| Ok(2u8)).with_depends_on("a"))
    .unwrap();

  // Act
  let err = factory.get_bean("a").unwrap_err();

  // Assert
  assert!(err.is_caused_by_circularity());
  assert!(err.to_string().contains("Circular depends-on relationship"), "unexpected error: {err}");
  assert_eq!(factory.state("a"), SingletonState::Absent);
}

#[test]
#[serial]
fn test_concurrent_requests_into_a_cycle_share_instances() {
  // Arrange
  let factory = Arc::new(cyclic_factory());
  let start = Arc::new(Barrier::new(8));

  // Act
  let handles: Vec<_> = (0..8)
    .map(|i| {
      let factory = factory.clone();
      let start = start.clone();
      thread::spawn(move || {
        start.wait();
        let name = if i % 2 == 0 { "a" } else { "b" };
        factory.get_bean(name).unwrap();
        factory.get_bean("a").unwrap()
      })
    })
    .collect();
  let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

  // Assert
  assert!(results.iter().all(|a| same_instance(a, &results[0])));
  let b = factory.get_bean("b").unwrap();
  assert!(same_instance(b.downcast_ref::<Node>().unwrap().peer().unwrap(), &results[0]));
}
