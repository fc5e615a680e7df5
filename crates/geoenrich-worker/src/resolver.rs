//! Address resolution
//!
//! Turns one raw address into one [`ResolutionResult`] in three rate-limited
//! steps:
//!
//! 1. geocode the address, keeping the first candidate's location and place
//!    id as the fallback
//! 2. search for places within a small radius of that location and pick the
//!    first one whose types mark it as a business
//! 3. fetch that business's details
//!
//! Every miss or failure becomes a tagged result; `resolve` never fails.

use geoenrich_common::types::{ResolutionResult, StatusTag};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::DEFAULT_SEARCH_RADIUS_METERS;
use crate::error::LookupError;
use crate::places::{NearbyPlace, PlacesApi};
use crate::rate_limit::Throttle;

/// Place types that count as an establishment.
pub const ESTABLISHMENT_TYPES: [&str; 5] = [
    "establishment",
    "point_of_interest",
    "store",
    "supermarket",
    "restaurant",
];

#[derive(Clone)]
pub struct AddressResolver {
    api: Arc<dyn PlacesApi>,
    throttle: Arc<dyn Throttle>,
    radius_meters: u32,
}

impl AddressResolver {
    pub fn new(api: Arc<dyn PlacesApi>, throttle: Arc<dyn Throttle>) -> Self {
        Self {
            api,
            throttle,
            radius_meters: DEFAULT_SEARCH_RADIUS_METERS,
        }
    }

    pub fn with_radius(mut self, radius_meters: u32) -> Self {
        self.radius_meters = radius_meters;
        self
    }

    #[instrument(skip(self, cancel))]
    pub async fn resolve(&self, address: &str, cancel: &CancellationToken) -> ResolutionResult {
        let candidates = match self.call(cancel, self.api.geocode(address)).await {
            Ok(candidates) => candidates,
            Err(e) => return ResolutionResult::failed(address, e.to_string()),
        };

        let Some(first) = candidates.into_iter().next() else {
            return ResolutionResult::tagged(address, None, StatusTag::NoResultsFound);
        };
        let fallback_id = first.place_id;

        let nearby = match self
            .call(cancel, self.api.nearby_search(first.location, self.radius_meters))
            .await
        {
            Ok(nearby) => nearby,
            Err(e) => {
                return ResolutionResult::tagged(
                    address,
                    Some(fallback_id),
                    StatusTag::NearbySearchFailed,
                )
                .with_error(e.to_string())
            },
        };

        let Some(establishment) = select_establishment(&nearby) else {
            debug!(candidates = nearby.len(), "No establishment near address");
            return ResolutionResult::tagged(
                address,
                Some(fallback_id),
                StatusTag::NoEstablishmentFound,
            );
        };
        let establishment_id = establishment.place_id.clone();

        match self
            .call(cancel, self.api.place_details(&establishment_id))
            .await
        {
            Ok(details) => ResolutionResult::resolved(address, establishment_id, details),
            Err(e) => ResolutionResult::tagged(
                address,
                Some(establishment_id),
                StatusTag::GetDetailsFailed,
            )
            .with_error(e.to_string()),
        }
    }

    /// Take one permit, then run `lookup` unless the job is cancelled first.
    async fn call<T, F>(&self, cancel: &CancellationToken, lookup: F) -> Result<T, LookupError>
    where
        F: Future<Output = Result<T, LookupError>>,
    {
        self.throttle
            .acquire(cancel)
            .await
            .map_err(|_| LookupError::Cancelled)?;

        tokio::select! {
            _ = cancel.cancelled() => Err(LookupError::Cancelled),
            result = lookup => result,
        }
    }
}

/// First candidate whose types intersect [`ESTABLISHMENT_TYPES`].
pub fn select_establishment(candidates: &[NearbyPlace]) -> Option<&NearbyPlace> {
    candidates.iter().find(|place| {
        place
            .types
            .iter()
            .any(|t| ESTABLISHMENT_TYPES.contains(&t.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(id: &str, types: &[&str]) -> NearbyPlace {
        NearbyPlace {
            place_id: id.to_string(),
            name: id.to_string(),
            types: types.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_selects_first_matching_category() {
        let nearby = vec![
            place("route", &["route"]),
            place("deli", &["food", "restaurant"]),
            place("shop", &["store"]),
        ];
        assert_eq!(select_establishment(&nearby).map(|p| p.place_id.as_str()), Some("deli"));
    }

    #[test]
    fn test_no_match_when_categories_disjoint() {
        let nearby = vec![place("road", &["route"]), place("area", &["political", "locality"])];
        assert!(select_establishment(&nearby).is_none());
        assert!(select_establishment(&[]).is_none());
    }
}
