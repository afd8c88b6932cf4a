//! Controllers: named groupings of actions under a base path

use crate::action::ActionBuilder;
use crate::procedure::ProcedureRef;

/// A named grouping of actions sharing a base path and optional
/// controller-level procedures.
///
/// Controllers are plain values; registering one into a router indexes its
/// actions and fixes their fully-qualified routes.
pub struct Controller {
    pub(crate) name: String,
    pub(crate) path: String,
    pub(crate) description: Option<String>,
    pub(crate) procedures: Vec<ProcedureRef>,
    pub(crate) actions: Vec<(String, ActionBuilder)>,
}

impl Controller {
    /// Create a controller mounted at `path` (may contain `:param` segments).
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            description: None,
            procedures: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Description for docs.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a procedure applied to every action in this controller.
    #[must_use]
    pub fn use_procedure(mut self, procedure: ProcedureRef) -> Self {
        self.procedures.push(procedure);
        self
    }

    /// Register an action under `key`.
    ///
    /// The key is the client-visible action identifier; together with the
    /// controller key it forms the revalidation key (`users.list`).
    #[must_use]
    pub fn action(mut self, key: impl Into<String>, action: ActionBuilder) -> Self {
        self.actions.push((key.into(), action));
        self
    }

    /// The controller name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The controller's base path segment.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Docs description, when one was set.
    pub fn describe(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("path", &self.path)
            .field(
                "actions",
                &self.actions.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .finish()
    }
}
