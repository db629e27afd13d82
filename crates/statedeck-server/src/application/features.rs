//! Toggleable features offered to subscribers.
//!
//! Subscribers can list features and switch them on or off.  What a feature
//! actually *is* belongs to the embedding application, so the session only
//! sees the [`FeatureController`] trait.  [`InMemoryFeatures`] is the
//! implementation the daemon uses: a catalogue seeded from the config file
//! where toggling just flips a flag.

use parking_lot::RwLock;
use statedeck_core::FeatureSummary;
use thiserror::Error;
use tracing::info;

use crate::infrastructure::storage::FeatureEntry;

/// Errors raised when a feature cannot be toggled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeatureError {
    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    /// The embedding application refused the change.
    #[error("feature {id} cannot be changed: {reason}")]
    Rejected { id: String, reason: String },
}

/// Seam between the control plane and whatever owns the features.
#[cfg_attr(test, mockall::automock)]
pub trait FeatureController: Send + Sync {
    /// Every feature, in display order.
    fn list(&self) -> Vec<FeatureSummary>;

    /// Activates or deactivates `id` and returns its new summary.
    ///
    /// Setting a feature to the state it is already in succeeds.
    fn set_active(&self, id: &str, active: bool) -> Result<FeatureSummary, FeatureError>;
}

/// A fixed catalogue of features whose state lives in memory.
#[derive(Debug, Default)]
pub struct InMemoryFeatures {
    features: RwLock<Vec<FeatureSummary>>,
}

impl InMemoryFeatures {
    pub fn new(features: impl IntoIterator<Item = FeatureSummary>) -> Self {
        let mut features: Vec<FeatureSummary> = features.into_iter().collect();
        features.sort_by_key(|f| f.name.to_lowercase());
        Self {
            features: RwLock::new(features),
        }
    }

    /// Builds the catalogue from `[[features]]` config entries.
    pub fn from_entries(entries: &[FeatureEntry]) -> Self {
        Self::new(
            entries
                .iter()
                .map(|e| FeatureSummary::new(&e.id, &e.name, e.active)),
        )
    }
}

impl FeatureController for InMemoryFeatures {
    /// Sorted by name, case-insensitively.
    fn list(&self) -> Vec<FeatureSummary> {
        self.features.read().clone()
    }

    fn set_active(&self, id: &str, active: bool) -> Result<FeatureSummary, FeatureError> {
        let mut features = self.features.write();
        let feature = features
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| FeatureError::UnknownFeature(id.to_string()))?;

        if feature.is_active != active {
            feature.is_active = active;
            info!(
                "feature {id} {}",
                if active { "activated" } else { "deactivated" }
            );
        }
        Ok(feature.clone())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
