//! Interval tracking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use warden_core::{Function, GlobalEnvironment, GlobalEnvironmentExt, Result, Value};

use super::{noop_rebuilder, Freer, Rebuilder};

struct IntervalPatch {
    tenant: String,
    global: Arc<dyn GlobalEnvironment>,
    raw_set: Value,
    raw_clear: Function,
    intervals: Arc<Mutex<Vec<Value>>>,
    freed: AtomicBool,
}

/// Wrap `setInterval`/`clearInterval` so every interval the tenant leaves
/// running is cleared on free.
pub fn patch_interval(tenant: &str, global: &Arc<dyn GlobalEnvironment>) -> Result<Box<dyn Freer>> {
    let raw_set_value = global.get_key("setInterval")?;
    let raw_set = raw_set_value.expect_function("setInterval")?.clone();
    let raw_clear = global.get_key("clearInterval")?.expect_function("clearInterval")?.clone();
    let intervals: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

    let clear = {
        let raw_clear = raw_clear.clone();
        let intervals = intervals.clone();
        Function::new("clearInterval", move |_this, args| {
            if let Some(id) = args.first() {
                intervals.lock().retain(|known| !known.same_value(id));
            }
            raw_clear.call(&Value::Undefined, args)
        })
    };

    let set = {
        let intervals = intervals.clone();
        Function::new("setInterval", move |_this, args| {
            let id = raw_set.call(&Value::Undefined, args)?;
            intervals.lock().push(id.clone());
            Ok(id)
        })
    };

    global.set_key("setInterval", set)?;
    global.set_key("clearInterval", clear)?;

    Ok(Box::new(IntervalPatch {
        tenant: tenant.to_string(),
        global: global.clone(),
        raw_set: raw_set_value,
        raw_clear,
        intervals,
        freed: AtomicBool::new(false),
    }))
}

impl Freer for IntervalPatch {
    fn name(&self) -> &'static str {
        "interval"
    }

    fn free(&self) -> Result<Rebuilder> {
        if self.freed.swap(true, Ordering::AcqRel) {
            return Ok(noop_rebuilder());
        }

        let leftover: Vec<Value> = self.intervals.lock().drain(..).collect();
        if !leftover.is_empty() {
            debug!("Clearing {} intervals left by {}", leftover.len(), self.tenant);
        }
        for id in leftover {
            self.raw_clear.call(&Value::Undefined, &[id])?;
        }

        self.global.set_key("setInterval", self.raw_set.clone())?;
        self.global
            .set_key("clearInterval", Value::Function(self.raw_clear.clone()))?;
        Ok(noop_rebuilder())
    }
}
