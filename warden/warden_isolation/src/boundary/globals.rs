//! Fixed key lists used by the interception boundaries.

/// Keys every boundary lets through to the real global. Writes to them are
/// recorded and undone when the last boundary deactivates.
pub const ESCAPE_KEYS: [&str; 2] = ["System", "__cjsWrapper"];

/// Extra escape keys while running in development mode.
pub const DEVELOPMENT_ESCAPE_KEYS: [&str; 2] = ["__REACT_ERROR_OVERLAY_GLOBAL_HOOK__", "event"];

/// Properties that must be bound to the real global before a tenant may
/// call them. Native implementations reject any other receiver.
pub const NATIVE_GLOBALS: &[&str] = &[
    "addEventListener",
    "alert",
    "atob",
    "blur",
    "btoa",
    "cancelAnimationFrame",
    "cancelIdleCallback",
    "clearInterval",
    "clearTimeout",
    "close",
    "confirm",
    "createImageBitmap",
    "dispatchEvent",
    "fetch",
    "find",
    "focus",
    "getComputedStyle",
    "getSelection",
    "matchMedia",
    "moveBy",
    "moveTo",
    "open",
    "postMessage",
    "print",
    "prompt",
    "queueMicrotask",
    "removeEventListener",
    "reportError",
    "requestAnimationFrame",
    "requestIdleCallback",
    "resizeBy",
    "resizeTo",
    "scroll",
    "scrollBy",
    "scrollTo",
    "setInterval",
    "setTimeout",
    "stop",
    "structuredClone",
];

/// Properties bound to the outermost real global even when the host runs
/// tenants under a nested global.
pub const BINDS_TO_NATIVE_GLOBAL: [&str; 1] = ["fetch"];

/// Language built-ins that are never shadowed per tenant. With speedy mode
/// on, reads of these skip the overlay and rebinding entirely.
pub const SCOPED_GLOBALS: &[&str] = &[
    "Array",
    "ArrayBuffer",
    "Boolean",
    "DataView",
    "Date",
    "Error",
    "EvalError",
    "Float32Array",
    "Float64Array",
    "Function",
    "Infinity",
    "Int16Array",
    "Int32Array",
    "Int8Array",
    "JSON",
    "Map",
    "Math",
    "NaN",
    "Number",
    "Object",
    "Promise",
    "Proxy",
    "RangeError",
    "ReferenceError",
    "Reflect",
    "RegExp",
    "Set",
    "String",
    "Symbol",
    "SyntaxError",
    "TypeError",
    "URIError",
    "Uint16Array",
    "Uint32Array",
    "Uint8Array",
    "Uint8ClampedArray",
    "WeakMap",
    "WeakSet",
    "decodeURI",
    "decodeURIComponent",
    "encodeURI",
    "encodeURIComponent",
    "escape",
    "isFinite",
    "isNaN",
    "parseFloat",
    "parseInt",
    "undefined",
    "unescape",
    "requestAnimationFrame",
];

/// Keys the proxy answers itself; they always report as present.
pub(crate) const OVERWRITTEN_GLOBALS: [&str; 4] = ["window", "self", "globalThis", "hasOwnProperty"];

pub fn is_native_global(key: &str) -> bool {
    NATIVE_GLOBALS.contains(&key)
}

pub fn is_scoped_global(key: &str) -> bool {
    SCOPED_GLOBALS.contains(&key)
}

pub(crate) fn is_escape_key(key: &str, development: bool) -> bool {
    ESCAPE_KEYS.contains(&key) || (development && DEVELOPMENT_ESCAPE_KEYS.contains(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_are_disjoint_where_required() {
        for key in ESCAPE_KEYS {
            assert!(!is_native_global(key));
            assert!(!is_scoped_global(key));
        }
        assert!(is_native_global("fetch"));
        assert!(is_scoped_global("parseInt"));
        assert!(!is_scoped_global("setTimeout"));
    }

    #[test]
    fn test_development_escape_keys() {
        assert!(is_escape_key("System", false));
        assert!(!is_escape_key("event", false));
        assert!(is_escape_key("event", true));
    }
}
