//! Elevation service client
//!
//! `GET {endpoint}/height?json={"shape":[{"lat":..,"lon":..}]}&api_key=..`
//! answering `{"height":[..]}`.

use super::CapabilityError;
use async_trait::async_trait;
use governor::Quota;
use polycity_common::models::ServiceEndpoint;
use serde::Deserialize;
use std::time::Duration;

const USER_AGENT: &str = concat!("polycity/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait ElevationLookup: Send + Sync {
    /// Terrain height at `[longitude, latitude]`
    async fn height(&self, endpoint: &ServiceEndpoint, lon_lat: [f64; 2])
        -> Result<f64, CapabilityError>;
}

/// Unkeyed limiter shared by the HTTP capability clients
pub(crate) type DirectLimiter = governor::RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// At most one request per `min_interval_ms`; `None` for a zero interval
pub(crate) fn spacing_limiter(min_interval_ms: u64) -> Option<DirectLimiter> {
    Quota::with_period(Duration::from_millis(min_interval_ms)).map(DirectLimiter::direct)
}

#[derive(Debug, Deserialize)]
struct HeightResponse {
    height: Option<Vec<Option<f64>>>,
}

pub struct HttpElevation {
    http_client: reqwest::Client,
    rate_limiter: Option<DirectLimiter>,
}

impl HttpElevation {
    pub fn new(min_interval_ms: u64) -> Result<Self, CapabilityError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            rate_limiter: spacing_limiter(min_interval_ms),
        })
    }
}

/// The `json` query parameter for one point
fn shape_query(lon_lat: [f64; 2]) -> String {
    serde_json::json!({ "shape": [{ "lat": lon_lat[1], "lon": lon_lat[0] }] }).to_string()
}

fn first_height(body: &str) -> Result<f64, CapabilityError> {
    let parsed: HeightResponse = serde_json::from_str(body)
        .map_err(|e| CapabilityError::Parse(format!("unexpected elevation response: {}", e)))?;
    parsed
        .height
        .and_then(|heights| heights.into_iter().next().flatten())
        .filter(|h| h.is_finite())
        .ok_or_else(|| {
            CapabilityError::Parse("elevation values not present in response".to_string())
        })
}

#[async_trait]
impl ElevationLookup for HttpElevation {
    async fn height(
        &self,
        endpoint: &ServiceEndpoint,
        lon_lat: [f64; 2],
    ) -> Result<f64, CapabilityError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let url = format!("{}/height", endpoint.url.trim_end_matches('/'));
        let mut query = vec![("json", shape_query(lon_lat))];
        if let Some(key) = &endpoint.api_key {
            query.push(("api_key", key.clone()));
        }

        tracing::debug!(lon = lon_lat[0], lat = lon_lat[1], "Querying elevation service");

        let response = self.http_client.get(&url).query(&query).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CapabilityError::Api(status.as_u16(), body));
        }

        first_height(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_query_is_lat_lon() {
        let query = shape_query([13.4, 52.5]);
        assert_eq!(query, r#"{"shape":[{"lat":52.5,"lon":13.4}]}"#);
    }

    #[test]
    fn test_first_height_parsed() {
        assert_eq!(first_height(r#"{"height":[34.0,12.0]}"#).unwrap(), 34.0);
    }

    #[test]
    fn test_missing_heights_rejected() {
        for body in [r#"{"height":[]}"#, r#"{"height":[null]}"#, r#"{}"#, "not json"] {
            assert!(matches!(first_height(body), Err(CapabilityError::Parse(_))), "{}", body);
        }
    }

    #[test]
    fn test_zero_interval_disables_limiting() {
        assert!(spacing_limiter(0).is_none());
        let limiter = spacing_limiter(1_000).unwrap();
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }
}
