//! Job configuration resolution
//!
//! Service endpoints and keys resolve CLI → `POLYCITY_*` environment →
//! TOML, like every other setting (see [`polycity_common::config`]).

use polycity_common::config::{resolve_optional, TomlConfig};
use polycity_common::models::ServiceEndpoint;
use std::path::PathBuf;
use tracing::info;

pub const ENV_ELEVATION_ENDPOINT: &str = "POLYCITY_ELEVATION_ENDPOINT";
pub const ENV_ELEVATION_KEY: &str = "POLYCITY_ELEVATION_KEY";
pub const ENV_PLACES_ENDPOINT: &str = "POLYCITY_PLACES_ENDPOINT";
pub const ENV_PLACES_KEY: &str = "POLYCITY_PLACES_KEY";

/// What the user asked for when starting a conversion
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Coordinate system code, e.g. `EPSG:25832`
    pub crs_code: Option<String>,
    /// Explicit proj4 definition; skips code resolution
    pub proj4: Option<String>,
    pub prefix: Option<String>,
    pub elevation_endpoint: Option<String>,
    pub elevation_key: Option<String>,
    pub places_endpoint: Option<String>,
    pub places_key: Option<String>,
    pub attribution: Option<String>,
    pub license: Option<String>,
}

/// Elevation service for a job (TOML always supplies a default URL)
pub fn elevation_endpoint(request: &JobRequest, toml: &TomlConfig) -> Option<ServiceEndpoint> {
    let url = resolve_optional(
        request.elevation_endpoint.as_deref(),
        ENV_ELEVATION_ENDPOINT,
        Some(toml.elevation.endpoint.as_str()),
    )?;
    let api_key = resolve_optional(
        request.elevation_key.as_deref(),
        ENV_ELEVATION_KEY,
        toml.elevation.api_key.as_deref(),
    );
    if api_key.is_none() {
        info!("No elevation API key configured; requests are sent without one");
    }
    Some(ServiceEndpoint { url, api_key })
}

/// Gazetteer for a job; `None` disables the place-lookup stage
pub fn places_endpoint(request: &JobRequest, toml: &TomlConfig) -> Option<ServiceEndpoint> {
    let url = resolve_optional(
        request.places_endpoint.as_deref(),
        ENV_PLACES_ENDPOINT,
        toml.places.endpoint.as_deref(),
    )?;
    let api_key = resolve_optional(
        request.places_key.as_deref(),
        ENV_PLACES_KEY,
        toml.places.api_key.as_deref(),
    );
    Some(ServiceEndpoint { url, api_key })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_elevation_cli_beats_toml() {
        std::env::remove_var(ENV_ELEVATION_ENDPOINT);
        std::env::remove_var(ENV_ELEVATION_KEY);
        let request = JobRequest {
            elevation_endpoint: Some("http://cli".to_string()),
            ..Default::default()
        };
        let endpoint = elevation_endpoint(&request, &TomlConfig::default()).unwrap();
        assert_eq!(endpoint.url, "http://cli");
        assert_eq!(endpoint.api_key, None);
    }

    #[test]
    #[serial]
    fn test_elevation_defaults_from_toml() {
        std::env::remove_var(ENV_ELEVATION_ENDPOINT);
        let endpoint = elevation_endpoint(&JobRequest::default(), &TomlConfig::default()).unwrap();
        assert_eq!(
            endpoint.url,
            polycity_common::config::DEFAULT_ELEVATION_ENDPOINT
        );
    }

    #[test]
    #[serial]
    fn test_places_env_and_absent() {
        std::env::remove_var(ENV_PLACES_ENDPOINT);
        assert!(places_endpoint(&JobRequest::default(), &TomlConfig::default()).is_none());

        std::env::set_var(ENV_PLACES_ENDPOINT, "http://wof");
        let endpoint = places_endpoint(&JobRequest::default(), &TomlConfig::default()).unwrap();
        std::env::remove_var(ENV_PLACES_ENDPOINT);
        assert_eq!(endpoint.url, "http://wof");
    }
}
