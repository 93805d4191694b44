//! Wrapper element creation and rendering into the mount container.

use std::fmt;
use std::sync::Arc;

use tracing::{error, warn};
use warden_core::error::ConfigError;
use warden_core::{Document, Element, Result};

use crate::collaborators::{Container, LegacyRender, RenderArgs, StyleScoper, SCOPE_ATTRIBUTE};
use crate::naming::{simulate_head, wrapper_id};

/// Style isolation settings that shape the wrapper element.
#[derive(Debug, Clone, Copy, Default)]
pub struct StyleIsolation {
    pub strict: bool,
    pub scoped_css: bool,
    /// Whether the host can attach shadow roots.
    pub shadow_dom: bool,
}

/// Builds fresh wrapper elements for one tenant instance.
pub struct ElementFactory {
    instance: String,
    markup: String,
    styles: Vec<String>,
    sandbox_cfg: String,
    isolation: StyleIsolation,
    scoper: Arc<dyn StyleScoper>,
}

impl ElementFactory {
    pub fn new(
        instance: &str,
        template: &str,
        styles: Vec<String>,
        sandbox_cfg: String,
        isolation: StyleIsolation,
        scoper: Arc<dyn StyleScoper>,
    ) -> Self {
        Self {
            instance: instance.to_string(),
            markup: simulate_head(template),
            styles,
            sandbox_cfg,
            isolation,
            scoper,
        }
    }

    pub fn create(&self) -> Element {
        let element = Element::with_id("div", &wrapper_id(&self.instance));
        element.set_attribute("data-name", &self.instance);
        element.set_attribute("data-version", env!("CARGO_PKG_VERSION"));
        element.set_attribute("data-sandbox-cfg", &self.sandbox_cfg);
        element.set_inner_html(&self.markup);
        for css in &self.styles {
            let style = Element::new("style");
            style.set_inner_html(css);
            element.append_child(style);
        }

        if self.isolation.strict {
            if self.isolation.shadow_dom {
                let shadow = element.attach_shadow();
                shadow.set_inner_html(&element.inner_html());
                element.set_inner_html("");
                for child in element.children() {
                    element.remove_child(&child);
                    shadow.append_child(child);
                }
            } else {
                warn!(
                    "Host does not support shadow DOM, strictStyleIsolation of {} will be ignored",
                    self.instance
                );
            }
        }

        if self.isolation.scoped_css {
            if element.attribute(SCOPE_ATTRIBUTE).is_none() {
                element.set_attribute(SCOPE_ATTRIBUTE, &self.instance);
            }
            for style in element.query_all("style") {
                self.scoper.process(&element, &style, &self.instance);
            }
        }

        element
    }
}

/// Point in the lifecycle a render happens at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Loading,
    Mounting,
    Mounted,
    Unmounted,
}

impl fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderPhase::Loading => write!(f, "loading"),
            RenderPhase::Mounting => write!(f, "mounting"),
            RenderPhase::Mounted => write!(f, "mounted"),
            RenderPhase::Unmounted => write!(f, "unmounted"),
        }
    }
}

/// Puts a tenant's wrapper into its container, or hands it to the legacy
/// renderer.
pub struct Renderer {
    instance: String,
    content: String,
    legacy: Option<LegacyRender>,
    document: Document,
    development: bool,
}

impl Renderer {
    pub fn new(
        instance: &str,
        content: String,
        legacy: Option<LegacyRender>,
        document: Document,
        development: bool,
    ) -> Self {
        Self {
            instance: instance.to_string(),
            content,
            legacy,
            document,
            development,
        }
    }

    pub fn render(
        &self,
        element: Option<&Element>,
        loading: bool,
        container: Option<&Container>,
        phase: RenderPhase,
    ) -> Result<()> {
        if let Some(legacy) = &self.legacy {
            if self.development {
                error!("Custom rendering function is deprecated, use the container setting instead");
            }
            let content = if element.is_some() {
                self.content.clone()
            } else {
                String::new()
            };
            return legacy(RenderArgs { loading, content });
        }

        let target = container.and_then(|c| c.resolve(&self.document));

        // The container may already be gone once the tenant is unmounted.
        if phase != RenderPhase::Unmounted && target.is_none() {
            let context = match phase {
                RenderPhase::Loading | RenderPhase::Mounting => {
                    format!("while {} {}!", self.instance, phase)
                }
                RenderPhase::Mounted => format!("after {} {}!", self.instance, phase),
                RenderPhase::Unmounted => format!("while {} rendering!", self.instance),
            };
            return Err(ConfigError::MissingContainer {
                container: container.map(|c| c.to_string()).unwrap_or_default(),
                context,
            }
            .into());
        }

        if let Some(target) = target {
            let present = element.map(|e| target.contains(e)).unwrap_or(false);
            if !present {
                target.clear_children();
                if let Some(element) = element {
                    target.append_child(element.clone());
                }
            }
        }
        Ok(())
    }
}

/// Resolves the element handed to the tenant as its container.
pub struct WrapperGetter {
    instance: String,
    legacy: bool,
    isolation: StyleIsolation,
    document: Document,
}

impl WrapperGetter {
    pub fn new(instance: &str, legacy: bool, isolation: StyleIsolation, document: Document) -> Self {
        Self {
            instance: instance.to_string(),
            legacy,
            isolation,
            document,
        }
    }

    /// Reject settings that cannot work together. Legacy rendering leaves
    /// no wrapper for style isolation to act on.
    pub fn check(&self) -> Result<()> {
        if self.legacy {
            if self.isolation.strict {
                return Err(ConfigError::IncompatibleOptions(
                    "strictStyleIsolation".to_string(),
                    "legacy render".to_string(),
                )
                .into());
            }
            if self.isolation.scoped_css {
                return Err(ConfigError::IncompatibleOptions(
                    "experimentalStyleIsolation".to_string(),
                    "legacy render".to_string(),
                )
                .into());
            }
        }
        Ok(())
    }

    pub fn get(&self, element: Option<&Element>) -> Result<Element> {
        self.check()?;
        let missing = || ConfigError::MissingWrapper(self.instance.clone());

        if self.legacy {
            return self
                .document
                .get_element_by_id(&wrapper_id(&self.instance))
                .ok_or_else(|| missing().into());
        }

        let element = element.ok_or_else(missing)?;
        if self.isolation.strict && self.isolation.shadow_dom {
            return element.shadow_root().ok_or_else(|| missing().into());
        }
        Ok(element.clone())
    }
}
