//! Content handlers: the pluggable code that actually checks, downloads,
//! installs and applies a component's update artifact.
//!
//! The bodies of real handlers (the HTTP download, the package-manager
//! invocation) are out of scope here; this module only defines the seam
//! a handler plugs into, staged the way the update worker (§4.6) walks
//! it — `is_installed` first, then `download`/`install`/`apply` in order
//! — and a `GenericHandler` stub used by tests and as a template for a
//! real implementation.

use std::collections::HashMap;

use crate::workflow::ComponentManifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallCheck {
    Installed,
    NotInstalled,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub extended_result_code: i64,
    pub message: String,
}

impl HandlerError {
    pub fn new(extended_result_code: i64, message: impl Into<String>) -> Self {
        HandlerError {
            extended_result_code,
            message: message.into(),
        }
    }
}

/// Implemented by each component-type-specific update handler.
///
/// Every stage runs to completion on the worker thread (see
/// [`crate::worker`]); none are expected to be cancellable mid-flight,
/// matching how a package manager invocation or firmware flash can't
/// meaningfully be half-undone once started.
pub trait ContentHandler: Send + Sync {
    fn handler_id(&self) -> &'static str;

    /// Checks whether this component's update is already applied; if so
    /// the worker skips straight to reporting `Idle` without running
    /// `download`/`install`/`apply`.
    fn is_installed(&self, component: &ComponentManifest) -> Result<InstallCheck, HandlerError>;

    fn download(&self, component: &ComponentManifest) -> Result<(), HandlerError>;

    fn install(&self, component: &ComponentManifest) -> Result<(), HandlerError>;

    fn apply(&self, component: &ComponentManifest) -> Result<(), HandlerError>;
}

/// A handler that always reports "not installed" and then succeeds at
/// every stage without doing anything; used in tests and as a
/// placeholder until a real handler is registered for a given component
/// type.
pub struct GenericHandler;

impl ContentHandler for GenericHandler {
    fn handler_id(&self) -> &'static str {
        "generic"
    }

    fn is_installed(&self, _component: &ComponentManifest) -> Result<InstallCheck, HandlerError> {
        Ok(InstallCheck::NotInstalled)
    }

    fn download(&self, _component: &ComponentManifest) -> Result<(), HandlerError> {
        Ok(())
    }

    fn install(&self, _component: &ComponentManifest) -> Result<(), HandlerError> {
        Ok(())
    }

    fn apply(&self, _component: &ComponentManifest) -> Result<(), HandlerError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn ContentHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Box<dyn ContentHandler>) {
        self.handlers.insert(handler.handler_id().to_string(), handler);
    }

    pub fn get(&self, handler_id: &str) -> Option<&dyn ContentHandler> {
        self.handlers.get(handler_id).map(|handler| handler.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component() -> ComponentManifest {
        ComponentManifest {
            component_id: "fw".into(),
            handler: "generic".into(),
            properties: serde_json::Value::Null,
        }
    }

    #[test]
    fn unregistered_handler_name_is_absent() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("firmware").is_none());
    }

    #[test]
    fn generic_handler_reports_not_installed_and_every_stage_succeeds() {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(GenericHandler));
        let handler = registry.get("generic").unwrap();
        let component = component();

        assert_eq!(handler.is_installed(&component).unwrap(), InstallCheck::NotInstalled);
        assert!(handler.download(&component).is_ok());
        assert!(handler.install(&component).is_ok());
        assert!(handler.apply(&component).is_ok());
    }
}
