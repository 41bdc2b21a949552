//! Best-effort cleanup registry run on the way out: chroot teardown,
//! pidfile removal, socket unlinking. Each finalizer runs even if an
//! earlier one failed; failures are logged, not propagated, since by the
//! time we're finalizing the VM is already gone.

pub struct Finalizers {
    actions: Vec<Box<dyn FnOnce() -> anyhow::Result<()> + Send>>,
}

impl Finalizers {
    pub fn new() -> Self {
        Finalizers { actions: Vec::new() }
    }

    pub fn push(&mut self, action: impl FnOnce() -> anyhow::Result<()> + Send + 'static) {
        self.actions.push(Box::new(action));
    }

    /// Run every registered finalizer in registration order, logging but
    /// not stopping on failure.
    pub fn run(self) {
        for action in self.actions {
            if let Err(e) = action() {
                tracing::warn!(error = %e, "finalizer failed");
            }
        }
    }
}

impl Default for Finalizers {
    fn default() -> Self {
        Self::new()
    }
}
