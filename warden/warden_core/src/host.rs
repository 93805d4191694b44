//! Host services backing the native global functions.
//!
//! Timers and window-level event listeners are the two side channels a
//! tenant most often leaves behind. They live here, outside any global, so
//! the host (and tests) can observe what is still subscribed after a tenant
//! unmounts. Time is virtual: nothing fires until [`HostServices::advance`].

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{EnvironmentError, Result};
use crate::traits::GlobalRef;
use crate::value::{Function, PropertyDescriptor, PropertyKey, Value};

/// Identifier returned by `setTimeout`/`setInterval`.
pub type TimerId = u64;

struct Timer {
    callback: Function,
    args: Vec<Value>,
    delay: u64,
    due_at: u64,
    repeat: bool,
}

struct TimerTable {
    next_id: TimerId,
    now: u64,
    timers: BTreeMap<TimerId, Timer>,
}

/// Timer queue, event listener table and fetch log of one host.
pub struct HostServices {
    timers: Mutex<TimerTable>,
    listeners: Mutex<IndexMap<String, Vec<Function>>>,
    fetches: Mutex<Vec<String>>,
}

impl HostServices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            timers: Mutex::new(TimerTable {
                next_id: 1,
                now: 0,
                timers: BTreeMap::new(),
            }),
            listeners: Mutex::new(IndexMap::new()),
            fetches: Mutex::new(Vec::new()),
        })
    }

    /// Schedule a callback `delay` virtual milliseconds from now.
    pub fn set_timer(&self, callback: Function, args: Vec<Value>, delay: u64, repeat: bool) -> TimerId {
        let mut table = self.timers.lock();
        let id = table.next_id;
        table.next_id += 1;
        let due_at = table.now.saturating_add(delay);
        table.timers.insert(
            id,
            Timer {
                callback,
                args,
                delay,
                due_at,
                repeat,
            },
        );
        id
    }

    pub fn clear_timer(&self, id: TimerId) -> bool {
        self.timers.lock().timers.remove(&id).is_some()
    }

    /// Ids of every scheduled timer.
    pub fn active_timers(&self) -> Vec<TimerId> {
        self.timers.lock().timers.keys().copied().collect()
    }

    /// Current virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.timers.lock().now
    }

    /// Move virtual time forward, firing every timer that falls due in
    /// order. Returns the number of callbacks run.
    pub fn advance(&self, ms: u64) -> Result<usize> {
        let target = self.now().saturating_add(ms);
        let mut fired = 0;

        loop {
            let next = {
                let mut table = self.timers.lock();
                let due = table
                    .timers
                    .iter()
                    .filter(|(_, t)| t.due_at <= target)
                    .min_by_key(|(id, t)| (t.due_at, **id))
                    .map(|(id, _)| *id);

                match due {
                    Some(id) => {
                        let timer = table.timers.get(&id).map(|t| (t.due_at, t.repeat));
                        match timer {
                            Some((due_at, true)) if due_at < u64::MAX => {
                                table.now = due_at;
                                let entry = table.timers.get_mut(&id);
                                entry.map(|t| {
                                    t.due_at = due_at.saturating_add(t.delay.max(1));
                                    (t.callback.clone(), t.args.clone())
                                })
                            }
                            // Timeouts, and intervals that can no longer be rescheduled.
                            Some((due_at, _)) => {
                                table.now = due_at;
                                table.timers.remove(&id).map(|t| (t.callback, t.args))
                            }
                            None => None,
                        }
                    }
                    None => None,
                }
            };

            match next {
                Some((callback, args)) => {
                    trace!("Firing timer callback {}", callback.name());
                    callback.call(&Value::Undefined, &args)?;
                    fired += 1;
                }
                None => break,
            }
        }

        self.timers.lock().now = target;
        Ok(fired)
    }

    /// Subscribe a window-level listener. Adding the same function twice
    /// for one event is a no-op.
    pub fn add_event_listener(&self, event: &str, listener: Function) {
        let mut listeners = self.listeners.lock();
        let entry = listeners.entry(event.to_string()).or_default();
        if !entry.iter().any(|l| l.ptr_eq(&listener)) {
            entry.push(listener);
        }
    }

    pub fn remove_event_listener(&self, event: &str, listener: &Function) -> bool {
        let mut listeners = self.listeners.lock();
        match listeners.get_mut(event) {
            Some(entry) => {
                let before = entry.len();
                entry.retain(|l| !l.ptr_eq(listener));
                entry.len() != before
            }
            None => false,
        }
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map(Vec::len).unwrap_or(0)
    }

    /// Listener count per event, skipping events with none.
    pub fn listener_counts(&self) -> IndexMap<String, usize> {
        self.listeners
            .lock()
            .iter()
            .filter(|(_, l)| !l.is_empty())
            .map(|(event, l)| (event.clone(), l.len()))
            .collect()
    }

    /// Call every listener of `event` with `payload`.
    pub fn dispatch(&self, event: &str, payload: Value) -> Result<usize> {
        let listeners = self.listeners.lock().get(event).cloned().unwrap_or_default();
        for listener in &listeners {
            listener.call(&Value::Undefined, std::slice::from_ref(&payload))?;
        }
        Ok(listeners.len())
    }

    /// Every url passed to the native `fetch`.
    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetches.lock().clone()
    }
}

/// Natives accept no receiver or the real global itself. Anything else is
/// the illegal invocation a browser would raise.
fn check_receiver(name: &str, this: &Value, real: &GlobalRef) -> Result<()> {
    match this {
        Value::Undefined => Ok(()),
        Value::Global(g) if g.ptr_eq(real) => Ok(()),
        _ => Err(EnvironmentError::IllegalInvocation(name.to_string()).into()),
    }
}

fn timer_id(args: &[Value]) -> TimerId {
    args.first()
        .and_then(Value::as_number)
        .map(|n| n as TimerId)
        .unwrap_or(0)
}

fn delay(args: &[Value]) -> u64 {
    args.get(1)
        .and_then(Value::as_number)
        .map(|n| n.max(0.0) as u64)
        .unwrap_or(0)
}

fn event_args<'a>(name: &str, args: &'a [Value]) -> Result<(String, &'a Function)> {
    let event = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
    let listener = args
        .get(1)
        .ok_or_else(|| EnvironmentError::NotCallable(format!("{name} listener")))?
        .expect_function("listener")?;
    Ok((event, listener))
}

/// Native functions installed on a browser-like global: name and descriptor.
pub(crate) fn native_functions(
    host: &Arc<HostServices>,
    real: &GlobalRef,
) -> Vec<(PropertyKey, PropertyDescriptor)> {
    let mut natives = Vec::new();

    for (name, repeat) in [("setTimeout", false), ("setInterval", true)] {
        let host = host.clone();
        let real = real.clone();
        natives.push(Function::new(name, move |this, args| {
            check_receiver(name, this, &real)?;
            let callback = args
                .first()
                .ok_or_else(|| EnvironmentError::NotCallable(format!("{name} handler")))?
                .expect_function("handler")?
                .clone();
            let extra = args.iter().skip(2).cloned().collect();
            Ok(Value::from(host.set_timer(callback, extra, delay(args), repeat)))
        }));
    }

    for name in ["clearTimeout", "clearInterval"] {
        let host = host.clone();
        let real = real.clone();
        natives.push(Function::new(name, move |this, args| {
            check_receiver(name, this, &real)?;
            host.clear_timer(timer_id(args));
            Ok(Value::Undefined)
        }));
    }

    {
        let host = host.clone();
        let real = real.clone();
        natives.push(Function::new("addEventListener", move |this, args| {
            check_receiver("addEventListener", this, &real)?;
            let (event, listener) = event_args("addEventListener", args)?;
            host.add_event_listener(&event, listener.clone());
            Ok(Value::Undefined)
        }));
    }

    {
        let host = host.clone();
        let real = real.clone();
        natives.push(Function::new("removeEventListener", move |this, args| {
            check_receiver("removeEventListener", this, &real)?;
            let (event, listener) = event_args("removeEventListener", args)?;
            host.remove_event_listener(&event, listener);
            Ok(Value::Undefined)
        }));
    }

    {
        let host = host.clone();
        let real = real.clone();
        natives.push(Function::new("fetch", move |this, args| {
            check_receiver("fetch", this, &real)?;
            let url = args.first().map(|v| v.to_string()).unwrap_or_default();
            host.fetches.lock().push(url.clone());
            Ok(Value::from(format!("response:{url}")))
        }));
    }

    natives
        .into_iter()
        .map(|f| {
            let descriptor = PropertyDescriptor::Data {
                value: Value::Function(f.clone()),
                writable: true,
                enumerable: true,
                configurable: true,
            };
            (PropertyKey::from(f.name()), descriptor)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Function) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let callback = Function::new("tick", move |_this, _args| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Undefined)
        });
        (count, callback)
    }

    #[test]
    fn test_interval_fires_repeatedly_until_cleared() {
        let host = HostServices::new();
        let (count, callback) = counter();

        let id = host.set_timer(callback, vec![], 10, true);
        assert_eq!(host.advance(35).unwrap(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);

        assert!(host.clear_timer(id));
        assert_eq!(host.advance(100).unwrap(), 0);
        assert!(host.active_timers().is_empty());
    }

    #[test]
    fn test_timeout_fires_once() {
        let host = HostServices::new();
        let (count, callback) = counter();

        host.set_timer(callback, vec![], 5, false);
        host.advance(4).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        host.advance(10).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(host.now(), 14);
    }

    #[test]
    fn test_listeners_are_deduplicated() {
        let host = HostServices::new();
        let (count, callback) = counter();

        host.add_event_listener("popstate", callback.clone());
        host.add_event_listener("popstate", callback.clone());
        assert_eq!(host.listener_count("popstate"), 1);
        assert_eq!(host.dispatch("popstate", Value::Null).unwrap(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(host.remove_event_listener("popstate", &callback));
        assert_eq!(host.listener_count("popstate"), 0);
    }

    #[test]
    fn test_far_future_timers_saturate() {
        let host = HostServices::new();
        let (count, callback) = counter();

        host.advance(1).unwrap();
        host.set_timer(callback.clone(), vec![], u64::MAX, false);
        host.set_timer(callback, vec![], u64::MAX, true);
        assert_eq!(host.advance(10).unwrap(), 0);

        assert_eq!(host.advance(u64::MAX).unwrap(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(host.now(), u64::MAX);
        assert!(host.active_timers().is_empty());
    }
}
