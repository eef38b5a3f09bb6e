//! Launch profile registry.
//!
//! Maps a profile key to a launch strategy plus its configuration payload.
//! Strategies are a closed set of tagged variants; nothing is dispatched
//! by dynamic type construction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from building a registry.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The registry must offer at least one profile.
    #[error("profile registry cannot be empty")]
    Empty,
}

/// How a profile's session gets its image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LaunchStrategy {
    /// A fixed, pre-built image.
    Image {
        /// Image tag to launch.
        image: String,
    },
    /// Build an image from a repository before launching.
    #[serde(rename = "repobuild")]
    RepoBuild {
        /// Pin the profile to a repository; `None` uses the configured or
        /// requested repository.
        #[serde(default)]
        repo: Option<String>,
    },
}

/// One selectable launch profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Stable lookup key.
    pub key: String,
    /// Human-readable title.
    pub title: String,
    /// Strategy and its payload.
    #[serde(flatten)]
    pub strategy: LaunchStrategy,
}

/// Registry of selectable launch profiles.
///
/// Lookup is by key; an unknown key falls through to the first profile,
/// which therefore acts as the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRegistry {
    profiles: Vec<Profile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self {
            profiles: vec![
                Profile {
                    key: "standard".to_string(),
                    title: "Standard environment".to_string(),
                    strategy: LaunchStrategy::Image {
                        image: "repospawn/base:latest".to_string(),
                    },
                },
                Profile {
                    key: "repobuild".to_string(),
                    title: "Build from repository".to_string(),
                    strategy: LaunchStrategy::RepoBuild { repo: None },
                },
            ],
        }
    }
}

impl ProfileRegistry {
    /// Build a registry from a non-empty profile list.
    pub fn new(profiles: Vec<Profile>) -> Result<Self, ProfileError> {
        if profiles.is_empty() {
            return Err(ProfileError::Empty);
        }
        Ok(Self { profiles })
    }

    /// Select the profile for `key`, or the first profile when the key is
    /// unknown.
    pub fn select(&self, key: &str) -> &Profile {
        self.profiles
            .iter()
            .find(|p| p.key == key)
            .unwrap_or(&self.profiles[0])
    }

    /// All profiles, in offer order.
    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }
}
