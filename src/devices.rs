//! Exclusive access to the audio devices.
//!
//! One `DeviceRegistry` is created by the application and shared by `Arc`
//! with every session. A session claims the microphone and speaker before it
//! touches hardware; a second concurrent claim fails with `AlreadyActive`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::{LiveChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Microphone,
    Speaker,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    microphone: AtomicBool,
    speaker: AtomicBool,
}

impl DeviceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn flag(&self, kind: DeviceKind) -> &AtomicBool {
        match kind {
            DeviceKind::Microphone => &self.microphone,
            DeviceKind::Speaker => &self.speaker,
        }
    }

    /// Claim a device; the lease releases it when dropped.
    pub fn claim(self: &Arc<Self>, kind: DeviceKind) -> Result<DeviceLease> {
        if self
            .flag(kind)
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LiveChatError::AlreadyActive);
        }
        debug!(device = ?kind, "Device claimed");
        Ok(DeviceLease {
            registry: Arc::clone(self),
            kind,
        })
    }

    /// Claim microphone and speaker together, or neither.
    pub fn claim_session(self: &Arc<Self>) -> Result<(DeviceLease, DeviceLease)> {
        let microphone = self.claim(DeviceKind::Microphone)?;
        let speaker = self.claim(DeviceKind::Speaker)?;
        Ok((microphone, speaker))
    }

    pub fn is_claimed(&self, kind: DeviceKind) -> bool {
        self.flag(kind).load(Ordering::SeqCst)
    }
}

/// Exclusive hold on one device.
#[derive(Debug)]
pub struct DeviceLease {
    registry: Arc<DeviceRegistry>,
    kind: DeviceKind,
}

impl DeviceLease {
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.registry.flag(self.kind).store(false, Ordering::SeqCst);
        debug!(device = ?self.kind, "Device released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_rejected_until_release() {
        let registry = DeviceRegistry::new();
        let lease = registry.claim(DeviceKind::Microphone).unwrap();
        assert_eq!(
            registry.claim(DeviceKind::Microphone).unwrap_err(),
            LiveChatError::AlreadyActive
        );

        drop(lease);
        assert!(!registry.is_claimed(DeviceKind::Microphone));
        assert!(registry.claim(DeviceKind::Microphone).is_ok());
    }

    #[test]
    fn failed_session_claim_releases_microphone() {
        let registry = DeviceRegistry::new();
        let _speaker = registry.claim(DeviceKind::Speaker).unwrap();

        assert!(registry.claim_session().is_err());
        assert!(!registry.is_claimed(DeviceKind::Microphone));
    }
}
