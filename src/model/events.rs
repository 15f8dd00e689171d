//! Event names and the per-instance emitter.

use std::fmt;

use event_emitter_rs::EventEmitter;

pub const CHANGE: &str = "change";
pub const UPDATE: &str = "update";
pub const ROLLBACK: &str = "rollback";
pub const BEFORE_SAVE: &str = "before-save";
pub const AFTER_SAVE: &str = "after-save";
pub const BEFORE_DESTROY: &str = "before-destroy";
pub const AFTER_DESTROY: &str = "after-destroy";

/// `change.<name>`, fired for one property or attachment.
pub fn change_of(name: &str) -> String {
    format!("{CHANGE}.{name}")
}

/// Listener registry owned by a single model instance.
///
/// Listeners receive a string payload: the new value as JSON for
/// `change.<name>`, the property name for `change`, and the model key (or an
/// empty string) for lifecycle events.
pub(crate) struct Emitter {
    inner: EventEmitter,
}

impl Emitter {
    pub(crate) fn new() -> Self {
        Self {
            inner: EventEmitter::new(),
        }
    }

    /// Returns the listener id for [`Emitter::off`].
    pub(crate) fn on<F>(&mut self, event: &str, listener: F) -> String
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.inner.on(event, listener)
    }

    pub(crate) fn off(&mut self, id: &str) -> bool {
        self.inner.remove_listener(id).is_some()
    }

    /// Runs every listener for `event` and waits for them, so observers see
    /// notifications in emission order.
    pub(crate) fn emit(&mut self, event: &str, payload: impl Into<String>) {
        let payload: String = payload.into();
        for handle in self.inner.emit(event, payload) {
            if handle.join().is_err() {
                tracing::warn!(event, "event listener panicked");
            }
        }
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}
