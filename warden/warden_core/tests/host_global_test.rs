use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use warden_core::{
    Document, Element, Function, GlobalEnvironmentExt, HostServices, PropertyKey, SharedGlobal, Value,
};

fn browser() -> (Arc<HostServices>, Document, Arc<SharedGlobal>) {
    let host = HostServices::new();
    let document = Document::new();
    let global = SharedGlobal::browser(&host, &document);
    (host, document, global)
}

fn counting(name: &str) -> (Arc<AtomicUsize>, Function) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = count.clone();
    let function = Function::new(name, move |_this, _args| {
        inner.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Undefined)
    });
    (count, function)
}

#[test]
fn test_natives_drive_host_services() {
    let (host, _document, global) = browser();
    let (ticks, tick) = counting("tick");

    let id = global
        .call_method("setInterval", &[Value::Function(tick), Value::from(10u64)])
        .unwrap();
    assert_eq!(host.active_timers().len(), 1);
    assert_eq!(host.advance(25).unwrap(), 2);
    assert_eq!(ticks.load(Ordering::SeqCst), 2);

    global.call_method("clearInterval", &[id]).unwrap();
    assert!(host.active_timers().is_empty());
}

#[test]
fn test_window_listeners_are_counted_per_event() {
    let (host, _document, global) = browser();
    let (calls, listener) = counting("on resize");

    global
        .call_method(
            "addEventListener",
            &[Value::from("resize"), Value::Function(listener.clone())],
        )
        .unwrap();
    assert_eq!(host.listener_counts().get("resize"), Some(&1));
    assert_eq!(host.dispatch("resize", Value::Null).unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    global
        .call_method(
            "removeEventListener",
            &[Value::from("resize"), Value::Function(listener)],
        )
        .unwrap();
    assert!(host.listener_counts().is_empty());
}

#[test]
fn test_fetch_is_logged() {
    let (host, _document, global) = browser();

    let response = global.call_method("fetch", &[Value::from("/api/data")]).unwrap();
    assert_eq!(response, Value::from("response:/api/data"));
    assert_eq!(host.fetched_urls(), vec!["/api/data".to_string()]);
}

#[test]
fn test_snapshot_reads_document_through_accessor() {
    let (_host, document, global) = browser();
    document.body().append_child(Element::with_id("div", "root"));
    global.set_key("theme", "dark").unwrap();

    let snapshot = global.enumerable_snapshot().unwrap();
    assert_eq!(snapshot.get(&PropertyKey::from("theme")), Some(&Value::from("dark")));

    let root = snapshot
        .get(&PropertyKey::from("document"))
        .and_then(Value::as_element)
        .cloned()
        .unwrap();
    assert!(root.ptr_eq(document.root()));
    assert!(root.get_element_by_id("root").is_some());
}
