//! Log record model and enrichment.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

/// Persistence priority hint passed to the store.
///
/// This is a hint only: it carries no ordering privilege at the channel
/// layer (spec: "no ordering privilege at this layer").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Flags {
    #[default]
    Default,
    Normal,
    Critical,
}

/// Device descriptor enrichment assigned at enqueue time if absent.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Device {
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub model: Option<String>,
    pub app_version: Option<String>,
}

impl Device {
    fn is_unset(&self) -> bool {
        self.os_name.is_none()
            && self.os_version.is_none()
            && self.model.is_none()
            && self.app_version.is_none()
    }
}

/// A single telemetry log record.
///
/// Fields assigned on enqueue (`id`, `timestamp`, `device`, `user_id`) are
/// only filled in when absent; once `didPrepareLog` has run they never
/// change again (I7).
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct Log {
    pub id: Option<String>,
    pub timestamp: Option<u128>,
    pub device: Option<Device>,
    pub user_id: Option<String>,
    pub flags: Flags,
    pub transmission_targets: HashSet<String>,
    pub payload: bytes::Bytes,
}

impl Log {
    pub fn new(payload: impl Into<bytes::Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.transmission_targets.insert(target.into());
        self
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Distinct target keys this record carries (prefix of each token up to
    /// the first `-`).
    pub fn target_keys(&self) -> HashSet<String> {
        self.transmission_targets
            .iter()
            .map(|t| target_key(t))
            .collect()
    }

    /// True if this record carries at least one target and every target key
    /// it carries is in `paused`. A record with no targets at all is never
    /// considered target-paused.
    pub fn all_targets_paused(&self, paused: &HashSet<String>) -> bool {
        if self.transmission_targets.is_empty() {
            return false;
        }
        self.target_keys().iter().all(|k| paused.contains(k))
    }

    /// Fill in id/device/timestamp/user_id if unset. Called once, on
    /// enqueue, before `prepareLog` runs.
    pub(crate) fn enrich(&mut self, device: &Device, ambient_user_id: Option<&str>) {
        if self.id.is_none() {
            self.id = Some(uuid::Uuid::new_v4().to_string());
        }
        if self.timestamp.is_none() {
            self.timestamp = Some(now_millis());
        }
        if self.device.as_ref().map(Device::is_unset).unwrap_or(true) {
            self.device = Some(device.clone());
        }
        if self.user_id.is_none() {
            if let Some(uid) = ambient_user_id {
                self.user_id = Some(uid.to_string());
            }
        }
    }
}

/// The prefix of a `"<key>-<secret>"` transmission-target token, up to the
/// first `-`.
pub fn target_key(token: &str) -> String {
    token.split('-').next().unwrap_or(token).to_string()
}

pub(crate) fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_key_splits_on_first_dash() {
        assert_eq!(target_key("k1-secret-with-dashes"), "k1");
        assert_eq!(target_key("no-dash-free"), "no");
        assert_eq!(target_key("plain"), "plain");
    }

    #[test]
    fn all_targets_paused_requires_at_least_one_target() {
        let record = Log::new(bytes_from("x"));
        let paused = HashSet::new();
        assert!(!record.all_targets_paused(&paused));
    }

    #[test]
    fn all_targets_paused_true_only_when_every_key_paused() {
        let record = Log::new(bytes_from("x"))
            .with_target("k1-secret")
            .with_target("k2-secret");
        let mut paused = HashSet::new();
        paused.insert("k1".to_string());
        assert!(!record.all_targets_paused(&paused));
        paused.insert("k2".to_string());
        assert!(record.all_targets_paused(&paused));
    }

    fn bytes_from(s: &str) -> bytes::Bytes {
        bytes::Bytes::copy_from_slice(s.as_bytes())
    }
}
