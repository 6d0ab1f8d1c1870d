use serde::{Deserialize, Serialize};

use crate::config::ProtectionLevel;

/// An OS capability backing a protection level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    UsageStats,
    AccessibilityService,
    LockTaskOwnership,
}

/// Capabilities a protection level needs for full-strength enforcement.
pub fn required_capabilities(level: ProtectionLevel) -> &'static [Capability] {
    match level {
        ProtectionLevel::Basic => &[],
        ProtectionLevel::Standard => &[Capability::UsageStats],
        ProtectionLevel::Strict => &[
            Capability::UsageStats,
            Capability::AccessibilityService,
            Capability::LockTaskOwnership,
        ],
    }
}

/// Host-reported capability grants. Anything not reported counts as not
/// granted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CapabilitySnapshot {
    #[serde(default)]
    pub usage_stats: bool,

    #[serde(default)]
    pub accessibility_service: bool,

    #[serde(default)]
    pub lock_task_ownership: bool,
}

impl CapabilitySnapshot {
    pub fn all_granted() -> Self {
        Self {
            usage_stats: true,
            accessibility_service: true,
            lock_task_ownership: true,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::UsageStats => self.usage_stats,
            Capability::AccessibilityService => self.accessibility_service,
            Capability::LockTaskOwnership => self.lock_task_ownership,
        }
    }
}

/// Verdict for a protection level against a snapshot.
///
/// A missing capability only weakens protection strength; it never stops
/// enforcement from running.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermissionStatus {
    pub level: ProtectionLevel,
    pub missing: Vec<Capability>,
    pub fully_granted: bool,
}

/// Reduce a snapshot to a fully-granted/degraded verdict. Capabilities the
/// level does not require are ignored.
pub fn evaluate(level: ProtectionLevel, snapshot: &CapabilitySnapshot) -> PermissionStatus {
    let missing: Vec<Capability> = required_capabilities(level)
        .iter()
        .copied()
        .filter(|c| !snapshot.has(*c))
        .collect();

    PermissionStatus {
        level,
        fully_granted: missing.is_empty(),
        missing,
    }
}

/// Source of capability snapshots, implemented by the host OS layer.
pub trait CapabilityProvider: Send + Sync {
    fn snapshot(&self) -> CapabilitySnapshot;
}

/// A fixed snapshot doubles as a provider for hosts whose grants cannot
/// change at runtime, and for tests.
impl CapabilityProvider for CapabilitySnapshot {
    fn snapshot(&self) -> CapabilitySnapshot {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_capability_table() {
        assert!(required_capabilities(ProtectionLevel::Basic).is_empty());
        assert_eq!(
            required_capabilities(ProtectionLevel::Standard),
            &[Capability::UsageStats]
        );
        assert_eq!(required_capabilities(ProtectionLevel::Strict).len(), 3);
    }

    #[test]
    fn test_basic_is_granted_with_nothing() {
        let status = evaluate(ProtectionLevel::Basic, &CapabilitySnapshot::default());
        assert!(status.fully_granted);
        assert!(status.missing.is_empty());
    }

    #[test]
    fn test_strict_reports_missing_capabilities() {
        let snapshot = CapabilitySnapshot {
            usage_stats: true,
            ..Default::default()
        };
        let status = evaluate(ProtectionLevel::Strict, &snapshot);
        assert!(!status.fully_granted);
        assert_eq!(
            status.missing,
            vec![
                Capability::AccessibilityService,
                Capability::LockTaskOwnership
            ]
        );
    }

    #[test]
    fn test_extra_grants_are_ignored() {
        let status = evaluate(ProtectionLevel::Standard, &CapabilitySnapshot::all_granted());
        assert!(status.fully_granted);
        assert!(status.missing.is_empty());
    }

    #[test]
    fn test_snapshot_is_a_provider() {
        let snapshot = CapabilitySnapshot::all_granted();
        let provider: &dyn CapabilityProvider = &snapshot;
        assert!(provider.snapshot().usage_stats);
    }
}
