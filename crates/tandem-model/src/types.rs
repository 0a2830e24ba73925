//! Registry of node factories, keyed by type tag.
//!
//! A replica can only materialize nodes whose type tag it knows, so every
//! participant registers the same set of types before joining.

use crate::template::NodeTemplate;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Factory = Arc<dyn Fn() -> NodeTemplate + Send + Sync>;

/// Maps type tags to factories producing fresh node templates.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    factories: HashMap<String, Factory>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. The factory's tag must match `type_tag`.
    pub fn register<F>(&mut self, type_tag: impl Into<String>, factory: F)
    where
        F: Fn() -> NodeTemplate + Send + Sync + 'static,
    {
        self.factories.insert(type_tag.into(), Arc::new(factory));
    }

    /// Register a fixed template; the tag is taken from the template itself.
    pub fn with(mut self, template: NodeTemplate) -> Self {
        let tag = template.type_tag().to_string();
        self.register(tag, move || template.clone());
        self
    }

    /// Produce a fresh template for `type_tag`, if it is known.
    pub fn create(&self, type_tag: &str) -> Option<NodeTemplate> {
        self.factories.get(type_tag).map(|factory| factory())
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.factories.contains_key(type_tag)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.factories.keys().collect();
        tags.sort();
        f.debug_struct("TypeRegistry").field("types", &tags).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_known_and_unknown() {
        let types = TypeRegistry::new().with(NodeTemplate::new("Board").list("notes"));

        assert!(types.contains("Board"));
        assert_eq!(types.create("Board").map(|t| t.type_tag().to_string()), Some("Board".into()));
        assert!(types.create("Note").is_none());
    }

    #[test]
    fn test_factory_called_each_time() {
        let mut types = TypeRegistry::new();
        types.register("Counter", || NodeTemplate::new("Counter").value("n", 0));
        let a = types.create("Counter");
        let b = types.create("Counter");
        assert_eq!(a, b);
        assert_eq!(types.len(), 1);
    }
}
