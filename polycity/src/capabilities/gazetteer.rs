//! Gazetteer (place lookup) client
//!
//! `GET {endpoint}/?latitude=..&longitude=..[&api_key=..]`; the service
//! answers with a JSON array of place records.

use super::elevation::{spacing_limiter, DirectLimiter};
use super::CapabilityError;
use async_trait::async_trait;
use polycity_common::models::ServiceEndpoint;
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = concat!("polycity/", env!("CARGO_PKG_VERSION"));
const MIN_INTERVAL_MS: u64 = 50;

#[async_trait]
pub trait Gazetteer: Send + Sync {
    /// Place records around `[longitude, latitude]`; never empty on success
    async fn lookup(&self, endpoint: &ServiceEndpoint, lon_lat: [f64; 2])
        -> Result<Vec<Value>, CapabilityError>;
}

pub struct HttpGazetteer {
    http_client: reqwest::Client,
    rate_limiter: Option<DirectLimiter>,
}

impl HttpGazetteer {
    pub fn new() -> Result<Self, CapabilityError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http_client,
            rate_limiter: spacing_limiter(MIN_INTERVAL_MS),
        })
    }
}

fn places(body: &str) -> Result<Vec<Value>, CapabilityError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| CapabilityError::Parse(format!("unexpected gazetteer response: {}", e)))?;
    match value {
        Value::Array(records) if !records.is_empty() => Ok(records),
        Value::Array(_) => Err(CapabilityError::Parse("no places found".to_string())),
        _ => Err(CapabilityError::Parse(
            "gazetteer response is not an array".to_string(),
        )),
    }
}

#[async_trait]
impl Gazetteer for HttpGazetteer {
    async fn lookup(
        &self,
        endpoint: &ServiceEndpoint,
        lon_lat: [f64; 2],
    ) -> Result<Vec<Value>, CapabilityError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let url = format!("{}/", endpoint.url.trim_end_matches('/'));
        let mut query = vec![
            ("latitude", lon_lat[1].to_string()),
            ("longitude", lon_lat[0].to_string()),
        ];
        if let Some(key) = &endpoint.api_key {
            query.push(("api_key", key.clone()));
        }

        let response = self.http_client.get(&url).query(&query).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CapabilityError::Api(status.as_u16(), body));
        }

        places(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_records_returned() {
        let records = places(r#"[{"id":85922583,"name":"Mitte"}]"#).unwrap();
        assert_eq!(records[0]["name"], "Mitte");
    }

    #[test]
    fn test_empty_or_malformed_rejected() {
        assert!(places("[]").is_err());
        assert!(places(r#"{"error":"x"}"#).is_err());
        assert!(places("<html>").is_err());
    }
}
