use async_trait::async_trait;
use geoenrich_common::types::EstablishmentDetails;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{GeocodeCandidate, LatLng, NearbyPlace, PlacesApi};
use crate::config::PlacesConfig;
use crate::error::LookupError;

const DETAIL_FIELDS: &str = "name,formatted_address,website,international_phone_number";
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Google Maps Geocoding / Places HTTP client.
///
/// Retries transport failures, timeouts, 429 and 5xx responses up to
/// `max_retries` times with exponential backoff. API-level statuses such as
/// `REQUEST_DENIED` are returned immediately.
#[derive(Clone)]
pub struct GoogleMapsClient {
    http: Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
    initial_backoff: Duration,
}

impl GoogleMapsClient {
    pub fn new(config: &PlacesConfig) -> Result<Self, LookupError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("geoenrich/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LookupError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
        })
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, LookupError> {
        let mut attempt = 0;

        loop {
            match self.get_once(path, query).await {
                Ok(body) => return Ok(body),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retryable(e)) if attempt < self.max_retries => {
                    let backoff = backoff_delay(self.initial_backoff, attempt);
                    attempt += 1;
                    warn!(
                        path,
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Lookup request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                },
                Err(Attempt::Retryable(e)) => return Err(e),
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, Attempt> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| Attempt::Retryable(LookupError::Transport(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let err = LookupError::Http(status.as_u16());
            return Err(if is_retryable_status(status) {
                Attempt::Retryable(err)
            } else {
                Attempt::Fatal(err)
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Attempt::Retryable(LookupError::Transport(e.to_string())))?;

        serde_json::from_slice(&bytes).map_err(|e| Attempt::Fatal(LookupError::Decode(e.to_string())))
    }
}

enum Attempt {
    Retryable(LookupError),
    Fatal(LookupError),
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// `OK` passes, `ZERO_RESULTS` passes when the endpoint allows it.
fn check_status(
    status: &str,
    error_message: Option<String>,
    zero_results_ok: bool,
) -> Result<(), LookupError> {
    match status {
        "OK" => Ok(()),
        "ZERO_RESULTS" if zero_results_ok => Ok(()),
        other => Err(LookupError::Status {
            status: other.to_string(),
            message: error_message,
        }),
    }
}

#[async_trait]
impl PlacesApi for GoogleMapsClient {
    #[instrument(skip(self))]
    async fn geocode(&self, address: &str) -> Result<Vec<GeocodeCandidate>, LookupError> {
        let body: GeocodeResponse = self
            .get_with_retry("/geocode/json", &[("address", address)])
            .await?;
        check_status(&body.status, body.error_message, true)?;

        debug!(candidates = body.results.len(), "Geocoded address");

        Ok(body
            .results
            .into_iter()
            .map(|r| GeocodeCandidate {
                place_id: r.place_id,
                types: r.types,
                location: LatLng::new(r.geometry.location.lat, r.geometry.location.lng),
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn nearby_search(
        &self,
        location: LatLng,
        radius_meters: u32,
    ) -> Result<Vec<NearbyPlace>, LookupError> {
        let location = format!("{:.6},{:.6}", location.lat, location.lng);
        let radius = radius_meters.to_string();

        let body: NearbySearchResponse = self
            .get_with_retry(
                "/place/nearbysearch/json",
                &[("location", location.as_str()), ("radius", radius.as_str())],
            )
            .await?;
        check_status(&body.status, body.error_message, true)?;

        Ok(body
            .results
            .into_iter()
            .map(|p| NearbyPlace {
                place_id: p.place_id,
                name: p.name,
                types: p.types,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn place_details(&self, place_id: &str) -> Result<EstablishmentDetails, LookupError> {
        let body: PlaceDetailsResponse = self
            .get_with_retry(
                "/place/details/json",
                &[("place_id", place_id), ("fields", DETAIL_FIELDS)],
            )
            .await?;
        check_status(&body.status, body.error_message, false)?;

        let result = body
            .result
            .ok_or_else(|| LookupError::Decode("details response has no result".to_string()))?;

        Ok(EstablishmentDetails {
            name: result.name,
            formatted_address: result.formatted_address,
            phone: result.international_phone_number.filter(|s| !s.is_empty()),
            website: result.website.filter(|s| !s.is_empty()),
        })
    }
}

// ============================================================================
// Wire formats
// ============================================================================

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    results: Vec<GeocodeResult>,
    status: String,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    place_id: String,
    #[serde(default)]
    types: Vec<String>,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct NearbySearchResponse {
    #[serde(default)]
    results: Vec<NearbyResult>,
    status: String,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NearbyResult {
    place_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    types: Vec<String>,
}

/// `initial * 2^attempt`, saturating at [`MAX_BACKOFF`].
fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    initial
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_BACKOFF)
}

#[derive(Debug, Deserialize)]
struct PlaceDetailsResponse {
    result: Option<DetailsResult>,
    status: String,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResult {
    #[serde(default)]
    name: String,
    #[serde(default)]
    formatted_address: String,
    international_phone_number: Option<String>,
    website: Option<String>,
}
