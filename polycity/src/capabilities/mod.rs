//! External capabilities
//!
//! Everything the pipeline delegates: reprojection, shell validation,
//! triangulation, the elevation and gazetteer services, model export,
//! model conversion and metadata injection. Stage handlers only see the
//! traits, so tests swap in fakes through [`Capabilities`].

pub mod convert;
pub mod elevation;
pub mod epsg;
pub mod export;
pub mod gazetteer;
pub mod metadata;
pub mod projection;
pub mod shell;
pub mod triangulate;

use polycity_common::config::TomlConfig;
use std::sync::Arc;
use thiserror::Error;

pub use convert::{CommandConverter, ModelConverter};
pub use elevation::{ElevationLookup, HttpElevation};
pub use export::{ExportRequest, ModelExporter, ObjExporter};
pub use gazetteer::{Gazetteer, HttpGazetteer};
pub use projection::Projection;
pub use shell::{NormalShellValidator, ShellErrorKind, ShellIssue, ShellValidator};
pub use triangulate::{EarClipping, Triangulator};

/// Capability failures; always isolable at the item level
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for CapabilityError {
    fn from(err: reqwest::Error) -> Self {
        CapabilityError::Network(err.to_string())
    }
}

/// The capability set shared by every stage handler of one worker
#[derive(Clone)]
pub struct Capabilities {
    pub validator: Arc<dyn ShellValidator>,
    pub triangulator: Arc<dyn Triangulator>,
    pub elevation: Arc<dyn ElevationLookup>,
    pub gazetteer: Arc<dyn Gazetteer>,
    pub exporter: Arc<dyn ModelExporter>,
    pub converter: Arc<dyn ModelConverter>,
}

impl Capabilities {
    /// Production capabilities configured from `polycity.toml`
    pub fn from_config(config: &TomlConfig) -> Result<Self, CapabilityError> {
        Ok(Self {
            validator: Arc::new(NormalShellValidator::default()),
            triangulator: Arc::new(EarClipping),
            elevation: Arc::new(HttpElevation::new(config.elevation.min_interval_ms)?),
            gazetteer: Arc::new(HttpGazetteer::new()?),
            exporter: Arc::new(ObjExporter),
            converter: Arc::new(CommandConverter::new(
                config.convert.program.clone(),
                config.convert.formats.clone(),
            )),
        })
    }
}
