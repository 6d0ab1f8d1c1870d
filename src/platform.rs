use anyhow::Result;
use tracing::{debug, warn};

/// Side-effecting commands issued to the host OS layer on phase edges.
///
/// Every command is best-effort and idempotent at this boundary: acquiring
/// an already-held wake lock is a no-op, and a failure weakens protection
/// rather than stopping enforcement.
pub trait PlatformCommands: Send + Sync {
    fn acquire_wake_lock(&self) -> Result<()>;
    fn release_wake_lock(&self) -> Result<()>;
    fn start_lock_task(&self) -> Result<()>;
    fn stop_lock_task(&self) -> Result<()>;
}

/// Platform boundary that only logs; used by the CLI foreground runner
/// and by hosts that wire the real commands elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPlatform;

impl PlatformCommands for NoopPlatform {
    fn acquire_wake_lock(&self) -> Result<()> {
        debug!("acquire wake lock (noop)");
        Ok(())
    }

    fn release_wake_lock(&self) -> Result<()> {
        debug!("release wake lock (noop)");
        Ok(())
    }

    fn start_lock_task(&self) -> Result<()> {
        debug!("start lock task (noop)");
        Ok(())
    }

    fn stop_lock_task(&self) -> Result<()> {
        debug!("stop lock task (noop)");
        Ok(())
    }
}

/// Run a platform command, downgrading failure to a warning so it stays
/// observable without touching the enforcement state.
pub(crate) fn best_effort(what: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!("Platform command failed ({}): {:#}", what, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_platform_always_succeeds() {
        let platform = NoopPlatform;
        assert!(platform.acquire_wake_lock().is_ok());
        assert!(platform.release_wake_lock().is_ok());
        assert!(platform.start_lock_task().is_ok());
        assert!(platform.stop_lock_task().is_ok());
    }

    #[test]
    fn test_best_effort_swallows_failure() {
        // must not panic
        best_effort("start lock task", Err(anyhow::anyhow!("denied")));
        best_effort("acquire wake lock", Ok(()));
    }
}
