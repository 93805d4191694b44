//! A minimal document model.
//!
//! The host only needs enough of a DOM to create a tenant's wrapper element,
//! find a mount container, attach a shadow root and walk style nodes. Markup
//! is kept as an opaque string on each element; it is never parsed.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

#[derive(Default)]
struct ElementData {
    tag: String,
    attributes: IndexMap<String, String>,
    inner_html: String,
    children: Vec<Element>,
    shadow_root: Option<Element>,
    style_processed: bool,
}

/// A shared handle to an element.
#[derive(Clone)]
pub struct Element(Arc<Mutex<ElementData>>);

impl Element {
    pub fn new(tag: &str) -> Self {
        Self(Arc::new(Mutex::new(ElementData {
            tag: tag.to_string(),
            ..ElementData::default()
        })))
    }

    /// Create an element with an `id` attribute.
    pub fn with_id(tag: &str, id: &str) -> Self {
        let element = Self::new(tag);
        element.set_attribute("id", id);
        element
    }

    pub fn tag(&self) -> String {
        self.0.lock().tag.clone()
    }

    pub fn id(&self) -> Option<String> {
        self.attribute("id")
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.0.lock().attributes.get(name).cloned()
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        self.0
            .lock()
            .attributes
            .insert(name.to_string(), value.to_string());
    }

    pub fn inner_html(&self) -> String {
        self.0.lock().inner_html.clone()
    }

    pub fn set_inner_html(&self, html: &str) {
        self.0.lock().inner_html = html.to_string();
    }

    pub fn children(&self) -> Vec<Element> {
        self.0.lock().children.clone()
    }

    pub fn first_child(&self) -> Option<Element> {
        self.0.lock().children.first().cloned()
    }

    pub fn append_child(&self, child: Element) {
        self.0.lock().children.push(child);
    }

    pub fn remove_child(&self, child: &Element) -> bool {
        let mut data = self.0.lock();
        let before = data.children.len();
        data.children.retain(|c| !c.ptr_eq(child));
        data.children.len() != before
    }

    /// Remove every child.
    pub fn clear_children(&self) {
        self.0.lock().children.clear();
    }

    /// Whether `other` is this element or one of its descendants.
    pub fn contains(&self, other: &Element) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        self.children().iter().any(|child| child.contains(other))
    }

    /// Attach an open shadow root, or return the existing one.
    pub fn attach_shadow(&self) -> Element {
        let mut data = self.0.lock();
        data.shadow_root
            .get_or_insert_with(|| Element::new("#shadow-root"))
            .clone()
    }

    pub fn shadow_root(&self) -> Option<Element> {
        self.0.lock().shadow_root.clone()
    }

    pub fn mark_style_processed(&self) {
        self.0.lock().style_processed = true;
    }

    pub fn is_style_processed(&self) -> bool {
        self.0.lock().style_processed
    }

    /// Depth-first search over children (and shadow roots) for every element
    /// with the given tag.
    pub fn query_all(&self, tag: &str) -> Vec<Element> {
        let mut found = Vec::new();
        self.collect(&|e| e.tag() == tag, &mut found);
        found
    }

    /// Depth-first search for the element with the given id.
    pub fn get_element_by_id(&self, id: &str) -> Option<Element> {
        let mut found = Vec::new();
        self.collect(&|e| e.id().as_deref() == Some(id), &mut found);
        found.into_iter().next()
    }

    fn collect(&self, predicate: &dyn Fn(&Element) -> bool, found: &mut Vec<Element>) {
        let (children, shadow) = {
            let data = self.0.lock();
            (data.children.clone(), data.shadow_root.clone())
        };
        for child in children.iter().chain(shadow.iter()) {
            if predicate(child) {
                found.push(child.clone());
            }
            child.collect(predicate, found);
        }
    }

    pub fn ptr_eq(&self, other: &Element) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.lock();
        f.debug_struct("Element")
            .field("tag", &data.tag)
            .field("attributes", &data.attributes)
            .field("children", &data.children.len())
            .finish()
    }
}

/// The host document.
#[derive(Clone, Debug)]
pub struct Document {
    root: Element,
    head: Element,
    body: Element,
}

impl Document {
    pub fn new() -> Self {
        let root = Element::new("html");
        let head = Element::new("head");
        let body = Element::new("body");
        root.append_child(head.clone());
        root.append_child(body.clone());
        Self { root, head, body }
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn head(&self) -> &Element {
        &self.head
    }

    pub fn body(&self) -> &Element {
        &self.body
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<Element> {
        self.root.get_element_by_id(id)
    }

    /// Resolve `#id` selectors by id and anything else by tag name.
    pub fn query_selector(&self, selector: &str) -> Option<Element> {
        match selector.strip_prefix('#') {
            Some(id) => self.get_element_by_id(id),
            None => self.root.query_all(selector).into_iter().next(),
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_selector_finds_nested_ids() {
        let document = Document::new();
        let outer = Element::with_id("div", "outer");
        let root = Element::with_id("div", "root");
        outer.append_child(root.clone());
        document.body().append_child(outer);

        let found = document.query_selector("#root").unwrap();
        assert!(found.ptr_eq(&root));
        assert!(document.query_selector("#missing").is_none());
        assert!(document.query_selector("body").unwrap().ptr_eq(document.body()));
    }

    #[test]
    fn test_shadow_root_is_searched() {
        let host = Element::new("div");
        let shadow = host.attach_shadow();
        shadow.append_child(Element::new("style"));

        assert!(host.attach_shadow().ptr_eq(&shadow));
        assert_eq!(host.query_all("style").len(), 1);
    }

    #[test]
    fn test_contains_and_remove() {
        let parent = Element::new("div");
        let child = Element::new("span");
        parent.append_child(child.clone());

        assert!(parent.contains(&child));
        assert!(parent.remove_child(&child));
        assert!(!parent.contains(&child));
        assert!(!parent.remove_child(&child));
    }
}
