//! Tenant instance naming and wrapper markup.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::config::SandboxSetting;

/// Tag that stands in for a tenant's `<head>`.
pub const HEAD_TAG: &str = "warden-head";

/// Hands out unique instance names: the first instance of a tenant keeps its
/// name, later ones get `name_1`, `name_2`, ...
#[derive(Default)]
pub struct InstanceNames {
    counts: Mutex<HashMap<String, usize>>,
}

impl InstanceNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, name: &str) -> String {
        let mut counts = self.counts.lock();
        match counts.get_mut(name) {
            Some(count) => {
                *count += 1;
                format!("{name}_{count}")
            }
            None => {
                counts.insert(name.to_string(), 0);
                name.to_string()
            }
        }
    }
}

/// Lower-case words joined by underscores. Word breaks are any
/// non-alphanumeric run and every lower-to-upper case change.
pub fn snake_case(input: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in input.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words.join("_")
}

/// Id of a tenant instance's wrapper element.
pub fn wrapper_id(instance: &str) -> String {
    format!("__warden_tenant_wrapper_for_{}__", snake_case(instance))
}

/// Rename a real `<head>` so the host document does not swallow it;
/// templates without one get an empty stand-in.
pub fn simulate_head(template: &str) -> String {
    if template.contains("<head>") {
        template
            .replacen("<head>", &format!("<{HEAD_TAG}>"), 1)
            .replacen("</head>", &format!("</{HEAD_TAG}>"), 1)
    } else {
        format!("<{HEAD_TAG}></{HEAD_TAG}>{template}")
    }
}

/// Serialized sandbox setting stamped on the wrapper.
pub fn sandbox_cfg(sandbox: &SandboxSetting) -> String {
    serde_json::to_string(sandbox).unwrap_or_else(|_| "true".to_string())
}

/// The tenant markup wrapped in its wrapper element.
pub fn wrap_template(instance: &str, template: &str, sandbox: &SandboxSetting) -> String {
    format!(
        "<div id=\"{}\" data-name=\"{}\" data-version=\"{}\" data-sandbox-cfg={}>{}</div>",
        wrapper_id(instance),
        instance,
        env!("CARGO_PKG_VERSION"),
        sandbox_cfg(sandbox),
        simulate_head(template)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_names() {
        let names = InstanceNames::new();
        assert_eq!(names.next("alpha"), "alpha");
        assert_eq!(names.next("alpha"), "alpha_1");
        assert_eq!(names.next("beta"), "beta");
        assert_eq!(names.next("alpha"), "alpha_2");
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("alpha"), "alpha");
        assert_eq!(snake_case("fooBar"), "foo_bar");
        assert_eq!(snake_case("react-app_1"), "react_app_1");
        assert_eq!(snake_case("--Vue App--"), "vue_app");
    }

    #[test]
    fn test_wrap_template_rewrites_head() {
        let sandbox = SandboxSetting::Enabled(true);
        let wrapped = wrap_template("alpha", "<head><title>a</title></head><main/>", &sandbox);
        assert!(wrapped.starts_with("<div id=\"__warden_tenant_wrapper_for_alpha__\""));
        assert!(wrapped.contains("<warden-head><title>a</title></warden-head><main/>"));
        assert!(wrapped.contains("data-sandbox-cfg=true"));

        let bare = wrap_template("alpha", "<main/>", &sandbox);
        assert!(bare.contains("<warden-head></warden-head><main/>"));
    }
}
