//! String-keyed lookup from `Task::function_name` to a [`TaskHandler`].

use std::collections::HashMap;
use std::sync::Arc;

use feedloom_transform::Transformer;

use crate::handlers::{SummarizeHandler, TaskHandler, TranslateHandler};

/// Installed task handlers, keyed by function name.
///
/// Tasks reference handlers by name rather than type so definitions stored
/// before a handler existed (or after one was removed) degrade to a
/// per-task error instead of breaking the scheduler.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with both built-in handlers backed by `transformer`.
    pub fn with_defaults(transformer: Arc<dyn Transformer>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TranslateHandler::new(transformer.clone())));
        registry.register(Arc::new(SummarizeHandler::new(transformer)));
        registry
    }

    /// Install a handler under its own name.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.name(), handler);
    }

    /// Look up a handler by function name.
    pub fn get(&self, function_name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(function_name).cloned()
    }

    /// Names of all installed handlers.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticTransformer;

    #[test]
    fn defaults_install_both_handlers() {
        let registry = TaskRegistry::with_defaults(Arc::new(StaticTransformer::default()));
        assert!(registry.get("translateTask").is_some());
        assert!(registry.get("summarizeTask").is_some());
        assert!(registry.get("unknownTask").is_none());
        assert_eq!(registry.names(), vec!["summarizeTask", "translateTask"]);
    }
}
