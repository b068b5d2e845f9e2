use {anyhow::Result, async_trait::async_trait};

/// Lifecycle hooks for a registered service.
///
/// All hooks default to no-ops; a service only implements the phases it
/// cares about. Hooks must be idempotent-friendly: the registry guarantees
/// each hook runs at most once per lifecycle phase.
#[async_trait]
pub trait Service: Send + Sync {
    /// One-time setup before `start`. Runs after all dependencies have
    /// initialized.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Begin active work. Runs after all dependencies have started.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Cease active work. Runs after all dependents have stopped.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}
