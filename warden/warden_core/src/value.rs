//! Runtime values for tenant code.
//!
//! Tenants do not run in a separate address space, so everything they can
//! observe about the shared environment is expressed with these types:
//! property keys, values, callables, plain objects and property descriptors.
//! Reference types (objects, functions, globals, elements) compare by
//! identity, numbers by `SameValue`.

use std::borrow::Borrow;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::dom::Element;
use crate::error::{EnvironmentError, Result};
use crate::traits::GlobalRef;

/// A property key on a global or plain object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyKey(String);

impl PropertyKey {
    /// Create a key from anything string-like.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PropertyKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The absent value.
    #[default]
    Undefined,
    /// The null value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(f64),
    /// A string.
    Str(String),
    /// A plain object.
    Object(ObjectRef),
    /// A callable.
    Function(Function),
    /// A handle to a global environment (real or virtual).
    Global(GlobalRef),
    /// A DOM element.
    Element(Element),
}

impl Value {
    /// Name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Global(_) => "global",
            Self::Element(_) => "element",
        }
    }

    /// `SameValue` comparison: reference types by identity, `NaN` equals
    /// itself, `+0` and `-0` differ.
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => {
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            }
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Global(a), Self::Global(b)) => a.ptr_eq(b),
            (Self::Element(a), Self::Element(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Undefined or null.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_global(&self) -> Option<&GlobalRef> {
        match self {
            Self::Global(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Read a property of an object-like value. Non-objects yield `Undefined`.
    pub fn get_property(&self, key: &str) -> Value {
        match self {
            Self::Object(o) => o.get(key),
            Self::Function(f) => f.properties().get(key),
            _ => Value::Undefined,
        }
    }

    /// Borrow the value as a function or fail with a type error.
    pub fn expect_function(&self, what: &str) -> Result<&Function> {
        self.as_function()
            .ok_or_else(|| EnvironmentError::NotCallable(what.to_string()).into())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Object(_) => write!(f, "[object Object]"),
            Self::Function(func) => write!(f, "[function {}]", func.name()),
            Self::Global(g) => write!(f, "[global {}]", g.label()),
            Self::Element(e) => write!(f, "[element {}]", e.tag()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Self::Function(f)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Self::Object(o)
    }
}

impl From<Element> for Value {
    fn from(e: Element) -> Self {
        Self::Element(e)
    }
}

impl From<GlobalRef> for Value {
    fn from(g: GlobalRef) -> Self {
        Self::Global(g)
    }
}

/// A plain object: an ordered, shared map of data properties.
#[derive(Clone, Default)]
pub struct ObjectRef(Arc<Mutex<IndexMap<PropertyKey, Value>>>);

impl ObjectRef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an object from key/value pairs.
    pub fn from_entries<K, V, I>(entries: I) -> Self
    where
        K: Into<PropertyKey>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<IndexMap<_, _>>();
        Self(Arc::new(Mutex::new(map)))
    }

    /// Read a property; missing properties are `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        self.0.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn set(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) {
        self.0.lock().insert(key.into(), value.into());
    }

    pub fn delete(&self, key: &str) -> bool {
        self.0.lock().shift_remove(key).is_some()
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<PropertyKey> {
        self.0.lock().keys().cloned().collect()
    }

    /// A copy of every entry, in insertion order.
    pub fn entries(&self) -> Vec<(PropertyKey, Value)> {
        self.0
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

type SyncBody = dyn Fn(&Value, &[Value]) -> Result<Value> + Send + Sync;
type AsyncBody = dyn Fn(Value, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync;

enum Body {
    Sync(Box<SyncBody>),
    Async(Box<AsyncBody>),
    /// A bound function forwards to its target with a fixed receiver.
    Bound(Function),
}

/// What kind of callable a function is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// An ordinary function whose receiver comes from the call site.
    Plain,
    /// A class or constructor; never rebound.
    Constructor,
    /// The result of [`Function::bind`].
    Bound,
}

struct FunctionInner {
    name: String,
    kind: FunctionKind,
    body: Body,
    bound_this: Option<Value>,
    properties: ObjectRef,
}

/// A reference-counted callable.
///
/// Clones share identity: two clones are `ptr_eq`, a [`Function::bind`]
/// result is a distinct function.
#[derive(Clone)]
pub struct Function(Arc<FunctionInner>);

impl Function {
    fn from_parts(name: String, kind: FunctionKind, body: Body) -> Self {
        Self(Arc::new(FunctionInner {
            name,
            kind,
            body,
            bound_this: None,
            properties: ObjectRef::new(),
        }))
    }

    /// Create a synchronous function.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::from_parts(name.into(), FunctionKind::Plain, Body::Sync(Box::new(body)))
    }

    /// Create a constructor. Constructors are called like any other function
    /// but are never rebound to another receiver.
    pub fn constructor<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::from_parts(
            name.into(),
            FunctionKind::Constructor,
            Body::Sync(Box::new(body)),
        )
    }

    /// Create an async function. It can only be run through [`Function::invoke`].
    pub fn new_async<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Value, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let body = move |this: Value, args: Vec<Value>| body(this, args).boxed();
        Self::from_parts(name.into(), FunctionKind::Plain, Body::Async(Box::new(body)))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> FunctionKind {
        self.0.kind
    }

    pub fn is_bound(&self) -> bool {
        self.0.kind == FunctionKind::Bound
    }

    pub fn is_constructor(&self) -> bool {
        self.0.kind == FunctionKind::Constructor
    }

    /// Whether calling this function requires `invoke`.
    pub fn is_async(&self) -> bool {
        match &self.0.body {
            Body::Async(_) => true,
            Body::Bound(target) => target.is_async(),
            Body::Sync(_) => false,
        }
    }

    /// Own properties of the function object (`fn.foo = ...`).
    pub fn properties(&self) -> &ObjectRef {
        &self.0.properties
    }

    /// Call synchronously with `this` as receiver. Bound functions ignore
    /// `this` and use their bound receiver.
    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value> {
        let this = self.0.bound_this.as_ref().unwrap_or(this);
        match &self.0.body {
            Body::Sync(body) => body(this, args),
            Body::Bound(target) => target.call(this, args),
            Body::Async(_) => Err(EnvironmentError::AsyncCall(self.0.name.clone()).into()),
        }
    }

    /// Call and await, whether the function is sync or async.
    pub fn invoke(&self, this: Value, args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        let this = self.0.bound_this.clone().unwrap_or(this);
        match &self.0.body {
            Body::Sync(body) => future::ready(body(&this, &args)).boxed(),
            Body::Async(body) => body(this, args),
            Body::Bound(target) => target.invoke(this, args),
        }
    }

    /// Produce a new function whose receiver is always `this`. Own
    /// properties of the original are copied onto the bound function.
    pub fn bind(&self, this: Value) -> Function {
        let properties = ObjectRef::from_entries(self.0.properties.entries());
        Self(Arc::new(FunctionInner {
            name: format!("bound {}", self.0.name),
            kind: FunctionKind::Bound,
            body: Body::Bound(self.clone()),
            bound_this: Some(this),
            properties,
        }))
    }

    /// The function a bound function forwards to.
    pub fn target(&self) -> Option<&Function> {
        match &self.0.body {
            Body::Bound(target) => Some(target),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// A stable identity for this function while it is alive.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn downgrade(&self) -> WeakFunction {
        WeakFunction(Arc::downgrade(&self.0))
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.0.name)
            .field("kind", &self.0.kind)
            .finish()
    }
}

/// A non-owning reference to a [`Function`].
#[derive(Clone)]
pub struct WeakFunction(Weak<FunctionInner>);

impl WeakFunction {
    pub fn upgrade(&self) -> Option<Function> {
        self.0.upgrade().map(Function)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

/// A property descriptor.
#[derive(Debug, Clone)]
pub enum PropertyDescriptor {
    /// A plain value slot.
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    /// A getter/setter pair.
    Accessor {
        get: Option<Function>,
        set: Option<Function>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// A writable, enumerable, configurable data descriptor.
    pub fn data(value: impl Into<Value>) -> Self {
        Self::Data {
            value: value.into(),
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// A non-writable, enumerable, non-configurable data descriptor.
    pub fn data_frozen(value: impl Into<Value>) -> Self {
        Self::Data {
            value: value.into(),
            writable: false,
            enumerable: true,
            configurable: false,
        }
    }

    /// An enumerable, configurable accessor descriptor.
    pub fn accessor(get: Option<Function>, set: Option<Function>) -> Self {
        Self::Accessor {
            get,
            set,
            enumerable: true,
            configurable: true,
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self, Self::Accessor { .. })
    }

    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }

    pub fn has_getter(&self) -> bool {
        matches!(self, Self::Accessor { get: Some(_), .. })
    }

    pub fn has_setter(&self) -> bool {
        matches!(self, Self::Accessor { set: Some(_), .. })
    }

    /// The stored value of a data descriptor.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// A property nobody can change: non-configurable and either
    /// non-writable or a getter without a setter.
    pub fn is_frozen(&self) -> bool {
        if self.is_configurable() {
            return false;
        }
        match self {
            Self::Data { writable, .. } => !writable,
            Self::Accessor { get, set, .. } => get.is_some() && set.is_none(),
        }
    }

    pub fn set_configurable(&mut self, value: bool) {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => {
                *configurable = value;
            }
        }
    }

    /// Make a data descriptor writable. No-op for accessors.
    pub fn set_writable(&mut self, value: bool) {
        if let Self::Data { writable, .. } = self {
            *writable = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_value_semantics() {
        assert!(Value::Number(f64::NAN).same_value(&Value::Number(f64::NAN)));
        assert!(!Value::Number(0.0).same_value(&Value::Number(-0.0)));
        assert_eq!(Value::from("a"), Value::from("a"));

        let a = ObjectRef::new();
        let b = ObjectRef::new();
        assert_eq!(Value::from(a.clone()), Value::from(a));
        assert_ne!(Value::from(ObjectRef::new()), Value::from(b));
    }

    #[test]
    fn test_bound_function_uses_bound_receiver() {
        let echo = Function::new("echo", |this, _args| Ok(this.clone()));
        echo.properties().set("flag", true);

        let bound = echo.bind(Value::from("fixed"));
        assert!(bound.is_bound());
        assert_eq!(bound.name(), "bound echo");
        assert_eq!(bound.properties().get("flag"), Value::Bool(true));
        assert_eq!(
            bound.call(&Value::from("ignored"), &[]).unwrap(),
            Value::from("fixed")
        );
        assert!(!bound.ptr_eq(&echo));
        assert!(bound.target().unwrap().ptr_eq(&echo));
    }

    #[test]
    fn test_async_function_rejects_sync_call() {
        let mount = Function::new_async("mount", |_this, _args| async { Ok(Value::Undefined) });
        assert!(mount.is_async());
        assert!(mount.call(&Value::Undefined, &[]).is_err());
    }

    #[tokio::test]
    async fn test_invoke_runs_both_kinds() {
        let sync = Function::new("one", |_this, _args| Ok(Value::from(1)));
        let asynchronous =
            Function::new_async("two", |_this, _args| async { Ok(Value::from(2)) });

        assert_eq!(
            sync.invoke(Value::Undefined, vec![]).await.unwrap(),
            Value::from(1)
        );
        assert_eq!(
            asynchronous.invoke(Value::Undefined, vec![]).await.unwrap(),
            Value::from(2)
        );
    }

    #[test]
    fn test_frozen_descriptor() {
        assert!(PropertyDescriptor::data_frozen(1).is_frozen());
        assert!(!PropertyDescriptor::data(1).is_frozen());

        let getter = Function::new("get", |_this, _args| Ok(Value::Null));
        let mut accessor = PropertyDescriptor::accessor(Some(getter), None);
        assert!(!accessor.is_frozen());
        accessor.set_configurable(false);
        assert!(accessor.is_frozen());
    }

    #[test]
    fn test_weak_function_does_not_keep_alive() {
        let f = Function::new("f", |_this, _args| Ok(Value::Undefined));
        let weak = f.downgrade();
        assert!(weak.is_alive());
        drop(f);
        assert!(weak.upgrade().is_none());
    }
}
