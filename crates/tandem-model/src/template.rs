//! Node templates: the declared shape of a node type.

use crate::value::Scalar;

/// How a single property starts out.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyTemplate {
    /// A value property with its default scalar.
    Value(Scalar),
    List,
    Set,
    Map,
}

/// Declared properties of a node type, in declaration order.
///
/// ```rust,ignore
/// let note = NodeTemplate::new("Note")
///     .value("text", "")
///     .value("position", Scalar::Null)
///     .list("tags");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct NodeTemplate {
    pub(crate) type_tag: String,
    pub(crate) properties: Vec<(String, PropertyTemplate)>,
}

impl NodeTemplate {
    /// Start a template for the given type tag.
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            properties: Vec::new(),
        }
    }

    /// Declare a value property with a default.
    pub fn value(self, name: impl Into<String>, default: impl Into<Scalar>) -> Self {
        self.with(name, PropertyTemplate::Value(default.into()))
    }

    /// Declare a list-valued property.
    pub fn list(self, name: impl Into<String>) -> Self {
        self.with(name, PropertyTemplate::List)
    }

    /// Declare a set-valued property.
    pub fn set(self, name: impl Into<String>) -> Self {
        self.with(name, PropertyTemplate::Set)
    }

    /// Declare a map-valued property.
    pub fn map(self, name: impl Into<String>) -> Self {
        self.with(name, PropertyTemplate::Map)
    }

    /// Redeclaring a name replaces the earlier declaration in place.
    fn with(mut self, name: impl Into<String>, property: PropertyTemplate) -> Self {
        let name = name.into();
        match self.properties.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = property,
            None => self.properties.push((name, property)),
        }
        self
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn properties(&self) -> &[(String, PropertyTemplate)] {
        &self.properties
    }
}
