//! External places lookup
//!
//! [`PlacesApi`] is the seam between the resolver and the HTTP transport.
//! Implementations report `ZERO_RESULTS` as an empty list and every other
//! non-`OK` outcome as a [`LookupError`].

use async_trait::async_trait;
use geoenrich_common::types::EstablishmentDetails;
use serde::{Deserialize, Serialize};

use crate::error::LookupError;

pub mod client;

pub use client::GoogleMapsClient;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// One geocoding match for an address.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeCandidate {
    pub place_id: String,
    pub types: Vec<String>,
    pub location: LatLng,
}

/// One place returned by a proximity search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearbyPlace {
    pub place_id: String,
    pub name: String,
    pub types: Vec<String>,
}

#[async_trait]
pub trait PlacesApi: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Vec<GeocodeCandidate>, LookupError>;

    async fn nearby_search(
        &self,
        location: LatLng,
        radius_meters: u32,
    ) -> Result<Vec<NearbyPlace>, LookupError>;

    async fn place_details(&self, place_id: &str) -> Result<EstablishmentDetails, LookupError>;
}
