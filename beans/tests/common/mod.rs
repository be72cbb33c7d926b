#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use fibre_beans::{Bean, BeanDefinition, BeanPostProcessor, BoxError, Value};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

// --- Fixtures ---

/// A bean holding one settable reference to another bean.
pub struct Node {
  pub name: &'static str,
  pub peer: OnceLock<Bean>,
}

impl Node {
  pub fn new(name: &'static str) -> Self {
    Self {
      name,
      peer: OnceLock::new(),
    }
  }

  pub fn peer(&self) -> Option<&Bean> {
    self.peer.get()
  }
}

/// A singleton `Node` whose `peer` property references `peer`.
pub fn node(name: &'static str, peer: &str) -> BeanDefinition {
  node_with(name, Value::reference(peer))
}

pub fn node_with(name: &'static str, peer: Value) -> BeanDefinition {
  BeanDefinition::new()
    .with_supplier(move || Ok(Node::new(name)))
    .with_property("peer", peer)
    .with_property_setter(set_peer)
}

pub fn set_peer(node: &Node, _property: &str, value: Bean) -> Result<(), BoxError> {
  node.peer.set(value).map_err(|_| "peer already set")?;
  Ok(())
}

/// A bean that can only be built from another bean.
pub struct Pair {
  pub other: Bean,
}

pub fn pair(other: &str) -> BeanDefinition {
  BeanDefinition::new()
    .with_constructor(|args| {
      let other = args.bean(0).cloned().ok_or("missing constructor argument")?;
      Ok(Pair { other })
    })
    .with_constructor_arg(Value::reference(other))
}

/// Wraps a bean after initialization.
pub struct Wrapper {
  pub inner: Bean,
}

/// Records events in the order they happen.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&self, event: impl Into<String>) {
    self.0.lock().push(event.into());
  }

  pub fn events(&self) -> Vec<String> {
    self.0.lock().clone()
  }
}

/// A `Node` singleton that records its own destruction.
pub fn recorded_node(name: &'static str, peer: Option<&str>, recorder: &Recorder) -> BeanDefinition {
  let recorder = recorder.clone();
  let definition = BeanDefinition::new()
    .with_supplier(move || Ok(Node::new(name)))
    .with_property_setter(set_peer)
    .with_destroy_method(move |node: &Node| {
      recorder.record(node.name);
      Ok(())
    });
  match peer {
    Some(peer) => definition.with_property("peer", Value::reference(peer)),
    None => definition,
  }
}

/// Wraps the bean named `target` after initialization.
pub struct WrapAfterInit {
  pub target: &'static str,
}

impl BeanPostProcessor for WrapAfterInit {
  fn after_initialization(&self, bean: Bean, name: &str) -> Result<Bean, BoxError> {
    if name == self.target {
      return Ok(Arc::new(Wrapper { inner: bean }));
    }
    Ok(bean)
  }
}

/// Hands out a wrapper as the early reference of `target`.
pub struct WrapEarly {
  pub target: &'static str,
}

impl BeanPostProcessor for WrapEarly {
  fn early_reference(&self, bean: Bean, name: &str) -> Result<Bean, BoxError> {
    if name == self.target {
      return Ok(Arc::new(Wrapper { inner: bean }));
    }
    Ok(bean)
  }
}
