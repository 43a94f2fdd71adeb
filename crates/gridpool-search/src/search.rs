//! Resource search — find a candidate image or instance for a
//! capability profile.
//!
//! Instance search returns one candidate chosen uniformly at random from
//! the result set rather than the first hit: when many callers race for
//! the same pool, always picking index 0 makes every one of them collide
//! on the same lock attempt, while a random pick spreads the contention
//! and lets a retrying caller land on a different instance.

use std::sync::Arc;

use tracing::debug;

use gridpool_compute::types::keys;
use gridpool_compute::{
    CapabilityProfile, ComputeBackend, Image, Instance, InstanceStatus, RandomSource,
};

use crate::filter::Filter;

/// Server-side search configuration.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    /// Value of the fixed platform label all pool resources carry.
    pub platform: String,
    /// Result-set cap for instance searches; the winner is drawn from
    /// up to this many candidates.
    pub max_in_search: u32,
    /// Filter fragment AND-ed into every image search.
    pub default_image_filter: Option<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            platform: "browser-grid".to_string(),
            max_in_search: 10,
            default_image_filter: None,
        }
    }
}

/// Search over the pool's instances and images.
#[derive(Clone)]
pub struct GridSearcher {
    backend: Arc<dyn ComputeBackend>,
    rng: RandomSource,
    settings: SearchSettings,
}

impl GridSearcher {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        rng: RandomSource,
        settings: SearchSettings,
    ) -> Self {
        Self {
            backend,
            rng,
            settings,
        }
    }

    /// Shared capability constraints: platform marker, OS, the browser
    /// present in any slot, and the shots flag.
    fn capability_filter(&self, profile: &CapabilityProfile) -> Filter {
        let browser_in_any_slot = Filter::any_of(
            keys::BROWSER_SLOTS
                .iter()
                .map(|slot| Filter::eq(&format!("labels.{slot}"), &profile.browser)),
        );
        Filter::eq(&format!("labels.{}", keys::PLATFORM), &self.settings.platform)
            .and(Filter::eq(&format!("labels.{}", keys::OS), &profile.os))
            .and_maybe(browser_in_any_slot)
            .and(Filter::eq(
                &format!("labels.{}", keys::SHOTS),
                if profile.shots { "true" } else { "false" },
            ))
    }

    /// Find an image able to boot a grid for `profile`. At most one
    /// result is requested from the backend.
    pub async fn search_image(
        &self,
        profile: &CapabilityProfile,
    ) -> gridpool_compute::ComputeResult<Option<Image>> {
        let filter = self
            .capability_filter(profile)
            .and_maybe(
                self.settings
                    .default_image_filter
                    .as_deref()
                    .map(Filter::raw),
            )
            .and_maybe(profile.image_filter.as_deref().map(Filter::raw));

        debug!(filter = %filter, "searching image");
        let hits = self.backend.list_images(filter.render(), 1).await?;
        Ok(hits.into_iter().next())
    }

    /// Find a free (unlocked, not-deleting) instance in `zone` with the
    /// desired lifecycle status, picked uniformly at random from up to
    /// `max_in_search` matches.
    pub async fn search_free_instance(
        &self,
        profile: &CapabilityProfile,
        zone: &str,
        status: InstanceStatus,
    ) -> gridpool_compute::ComputeResult<Option<Instance>> {
        let filter = self
            .capability_filter(profile)
            .and(Filter::eq("status", status.as_str()))
            .and(Filter::eq(
                &format!("labels.{}", keys::LOCKED_BY),
                keys::UNLOCKED,
            ))
            .and(Filter::ne(&format!("labels.{}", keys::DELETING), "true"))
            .and_maybe(profile.instance_filter.as_deref().map(Filter::raw));

        debug!(filter = %filter, zone, "searching instance");
        let hits = self
            .backend
            .list_instances(zone, filter.render(), self.settings.max_in_search)
            .await?;
        debug!(zone, candidates = hits.len(), "instance search finished");
        Ok(self.rng.pick(&hits).cloned())
    }
}
