//! Interfaces to the collaborators the orchestrator depends on but does not
//! implement: asset loading and style scoping.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use warden_core::{Document, Element, GlobalEnvironment, ObjectRef, Result, Value};

/// Where a tenant is mounted.
#[derive(Clone, Debug)]
pub enum Container {
    /// Resolved against the host document on every render (`#id` or a tag).
    Selector(String),
    /// A specific element.
    Element(Element),
}

impl Container {
    pub fn resolve(&self, document: &Document) -> Option<Element> {
        match self {
            Container::Selector(selector) => document.query_selector(selector),
            Container::Element(element) => Some(element.clone()),
        }
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Container::Selector(a), Container::Selector(b)) => a == b,
            (Container::Element(a), Container::Element(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Container::Selector(selector) => write!(f, "{selector}"),
            Container::Element(element) => write!(f, "<{}>", element.tag()),
        }
    }
}

impl From<&str> for Container {
    fn from(selector: &str) -> Self {
        Container::Selector(selector.to_string())
    }
}

impl From<Element> for Container {
    fn from(element: Element) -> Self {
        Container::Element(element)
    }
}

/// Arguments handed to a legacy custom renderer.
#[derive(Debug, Clone)]
pub struct RenderArgs {
    pub loading: bool,
    /// The wrapped tenant markup, or empty when the tenant is being removed.
    pub content: String,
}

/// A caller-supplied renderer used instead of a container.
pub type LegacyRender = Arc<dyn Fn(RenderArgs) -> Result<()> + Send + Sync>;

/// A tenant as registered by the caller.
#[derive(Clone)]
pub struct TenantApp {
    /// Tenant name; instance names are derived from it.
    pub name: String,

    /// Entry handed to the asset loader.
    pub entry: String,

    /// Default mount container.
    pub container: Option<Container>,

    /// Legacy custom renderer.
    pub render: Option<LegacyRender>,

    /// Props passed to every lifecycle function.
    pub props: ObjectRef,
}

impl TenantApp {
    pub fn new(name: &str, entry: &str) -> Self {
        Self {
            name: name.to_string(),
            entry: entry.to_string(),
            container: None,
            render: None,
            props: ObjectRef::new(),
        }
    }

    pub fn with_container(mut self, container: impl Into<Container>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn with_render(mut self, render: LegacyRender) -> Self {
        self.render = Some(render);
        self
    }

    pub fn with_props(mut self, props: ObjectRef) -> Self {
        self.props = props;
        self
    }
}

impl fmt::Debug for TenantApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantApp")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("container", &self.container)
            .field("legacy_render", &self.render.is_some())
            .finish()
    }
}

/// Options for evaluating tenant code.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Globals the evaluator may resolve directly against the real global.
    pub scoped_globals: Vec<&'static str>,
}

/// Executable tenant code.
#[async_trait]
pub trait TenantScript: Send + Sync {
    /// Fetch any scripts that must be present before evaluation.
    async fn fetch_side_scripts(&self) -> Result<()>;

    /// Evaluate the tenant against `global` and return its exports.
    /// `isolated` is false when writes reach the real global.
    async fn execute(
        &self,
        global: Arc<dyn GlobalEnvironment>,
        isolated: bool,
        options: ExecOptions,
    ) -> Result<Value>;
}

/// A tenant's loaded assets.
#[derive(Clone)]
pub struct TenantPayload {
    /// Tenant markup
    pub template: String,

    /// Style sheets to inline into the wrapper
    pub styles: Vec<String>,

    /// Public path assets are served from
    pub asset_base_path: String,

    /// Executable code
    pub script: Arc<dyn TenantScript>,
}

/// Resolves a tenant entry into its payload.
#[async_trait]
pub trait AssetLoader: Send + Sync {
    async fn import_entry(&self, entry: &str) -> Result<TenantPayload>;
}

/// Rewrites a style node so its rules only apply inside a tenant.
pub trait StyleScoper: Send + Sync {
    /// Process `style` in place. Must be a no-op for already processed nodes.
    fn process(&self, container: &Element, style: &Element, scope_id: &str);
}

/// Attribute that marks a tenant wrapper for scoped style rules.
pub const SCOPE_ATTRIBUTE: &str = "data-warden";

/// A scoper that prefixes each rule block with the wrapper's scope
/// attribute selector.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrefixStyleScoper;

impl StyleScoper for PrefixStyleScoper {
    fn process(&self, _container: &Element, style: &Element, scope_id: &str) {
        if style.is_style_processed() {
            return;
        }

        let prefix = format!("div[{SCOPE_ATTRIBUTE}=\"{scope_id}\"]");
        let css = style.inner_html();
        let mut scoped = String::with_capacity(css.len() + prefix.len());
        for (i, block) in css.split('}').enumerate() {
            if i > 0 {
                scoped.push('}');
            }
            match block.split_once('{') {
                Some((selectors, body)) if !selectors.trim().is_empty() => {
                    let selectors: Vec<String> = selectors
                        .split(',')
                        .map(|s| format!("{prefix} {}", s.trim()))
                        .collect();
                    scoped.push_str(&selectors.join(", "));
                    scoped.push_str(" {");
                    scoped.push_str(body);
                }
                _ => scoped.push_str(block),
            }
        }

        style.set_inner_html(&scoped);
        style.mark_style_processed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_scoper_is_idempotent() {
        let container = Element::new("div");
        let style = Element::new("style");
        style.set_inner_html("h1, p { color: red }");

        let scoper = PrefixStyleScoper;
        scoper.process(&container, &style, "alpha");
        let once = style.inner_html();
        scoper.process(&container, &style, "alpha");

        assert_eq!(
            once,
            "div[data-warden=\"alpha\"] h1, div[data-warden=\"alpha\"] p { color: red }"
        );
        assert_eq!(style.inner_html(), once);
    }

    #[test]
    fn test_container_resolution() {
        let document = Document::new();
        let root = Element::with_id("div", "root");
        document.body().append_child(root.clone());

        assert!(Container::from("#root").resolve(&document).unwrap().ptr_eq(&root));
        assert!(Container::from("#missing").resolve(&document).is_none());
        assert_eq!(Container::from("#root"), Container::Selector("#root".to_string()));
    }
}
