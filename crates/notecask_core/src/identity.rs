//! Device identity for multi-device storage.
//!
//! Every participating device is identified by a (ProfileId, InstanceId)
//! pair. The profile id is stable per user account; the instance id is
//! stable per installation. Both are opaque identifiers (22- or 36-character
//! strings in practice); new ones are generated as UUID v4 strings.
//!
//! A device only ever writes files named with its own identity. Peer files
//! are recognized (and skipped on the write path) by comparing both halves.

use serde::{Deserialize, Serialize};

/// Identity of this device within a storage directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Stable per user-account identifier.
    pub profile_id: String,

    /// Stable per-installation identifier.
    pub instance_id: String,
}

impl DeviceIdentity {
    /// Create an identity from existing ids.
    pub fn new(profile_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Generate a fresh identity with random UUID v4 ids.
    pub fn generate() -> Self {
        Self {
            profile_id: uuid::Uuid::new_v4().to_string(),
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Generate a fresh instance under an existing profile.
    pub fn generate_instance(profile_id: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// The `<profile>_<instance>` prefix used in filenames this device owns.
    pub fn file_prefix(&self) -> String {
        format!("{}_{}", self.profile_id, self.instance_id)
    }

    /// Whether a file creator matches this device.
    ///
    /// Legacy filenames carry only an instance id; in that case the profile
    /// half cannot be compared and the instance id alone decides.
    pub fn matches(&self, instance_id: &str, profile_id: Option<&str>) -> bool {
        if self.instance_id != instance_id {
            return false;
        }
        match profile_id {
            Some(p) => self.profile_id == p,
            None => true,
        }
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.profile_id, self.instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        let a = DeviceIdentity::generate();
        let b = DeviceIdentity::generate();
        assert_ne!(a.instance_id, b.instance_id);
        assert_ne!(a.profile_id, b.profile_id);
        assert_eq!(a.instance_id.len(), 36);
    }

    #[test]
    fn test_generate_instance_shares_profile() {
        let a = DeviceIdentity::generate();
        let b = DeviceIdentity::generate_instance(a.profile_id.clone());
        assert_eq!(a.profile_id, b.profile_id);
        assert_ne!(a.instance_id, b.instance_id);
    }

    #[test]
    fn test_matches() {
        let id = DeviceIdentity::new("profile-a", "instance-1");

        assert!(id.matches("instance-1", Some("profile-a")));
        assert!(id.matches("instance-1", None));
        assert!(!id.matches("instance-2", Some("profile-a")));
        assert!(!id.matches("instance-1", Some("profile-b")));
    }

    #[test]
    fn test_file_prefix() {
        let id = DeviceIdentity::new("p", "i");
        assert_eq!(id.file_prefix(), "p_i");
    }
}
