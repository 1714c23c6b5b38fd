//! Coordinate system code → proj4 definition
//!
//! WGS84 geographic and the UTM families are answered locally; everything
//! else is looked up on epsg.io.

use super::{CapabilityError, Projection};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

pub const EPSG_IO_URL: &str = "https://epsg.io/";
const USER_AGENT: &str = concat!("polycity/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    proj4: Option<String>,
}

/// epsg.io search client
pub struct EpsgClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl EpsgClient {
    pub fn new() -> Result<Self, CapabilityError> {
        Self::with_base_url(EPSG_IO_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, CapabilityError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.to_string(),
        })
    }

    async fn lookup(&self, code: &str) -> Result<String, CapabilityError> {
        debug!(code, "Querying epsg.io");
        let response = self
            .http_client
            .get(&self.base_url)
            .query(&[("q", code), ("format", "json")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Api(status.as_u16(), body));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Parse(format!("epsg.io response: {}", e)))?;

        body.results
            .into_iter()
            .next()
            .and_then(|r| r.proj4)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                CapabilityError::Projection(format!("no proj4 definition found for EPSG:{}", code))
            })
    }

    /// Resolve a code such as `EPSG:25832` (or `25832`) to a usable projection
    ///
    /// The definition is parsed before returning, so an unsupported
    /// projection is reported here rather than inside a worker.
    pub async fn resolve(&self, code: &str) -> Result<Projection, CapabilityError> {
        let number = normalize_code(code)?;
        let definition = match local_definition(number) {
            Some(definition) => definition,
            None => self.lookup(&number.to_string()).await?,
        };
        info!(code, proj4 = %definition, "Resolved coordinate system");
        Projection::from_proj4(&definition)
    }
}

fn normalize_code(code: &str) -> Result<u32, CapabilityError> {
    let trimmed = code.trim();
    let digits = trimmed
        .strip_prefix("EPSG:")
        .or_else(|| trimmed.strip_prefix("epsg:"))
        .unwrap_or(trimmed);
    digits
        .parse::<u32>()
        .map_err(|_| CapabilityError::Projection(format!("'{}' is not an EPSG code", code)))
}

/// Definitions known without a network round trip
pub fn local_definition(code: u32) -> Option<String> {
    match code {
        4326 => Some("+proj=longlat +datum=WGS84 +no_defs".to_string()),
        32601..=32660 => Some(format!(
            "+proj=utm +zone={} +datum=WGS84 +units=m +no_defs",
            code - 32600
        )),
        32701..=32760 => Some(format!(
            "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs",
            code - 32700
        )),
        // ETRS89 / UTM
        25828..=25838 => Some(format!(
            "+proj=utm +zone={} +ellps=GRS80 +units=m +no_defs",
            code - 25800
        )),
        _ => None,
    }
}
