//! Shared fixtures for pipeline integration tests
//!
//! CityGML documents are generated (axis-aligned boxes in UTM zone 33
//! coordinates) and the network-facing capabilities are replaced by fakes,
//! so every test runs offline against the in-memory store and queues.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use polycity::capabilities::{
    CapabilityError, Capabilities, EarClipping, ElevationLookup, Gazetteer, ModelConverter,
    NormalShellValidator, ObjExporter, Triangulator,
};
use polycity::pipeline::{JobRegistry, StageWorker};
use polycity::{stages, PipelineContext};
use polycity_common::config::TimingConfig;
use polycity_common::models::{Job, JobConfig, Point3, ServiceEndpoint, Stage, Triangle};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const UTM33: &str = "+proj=utm +zone=33 +datum=WGS84 +units=m +no_defs";
pub const BASE_X: f64 = 391_000.0;
pub const BASE_Y: f64 = 5_820_000.0;
pub const FAKE_ELEVATION: f64 = 42.0;

/// Ground-surface variants for generated buildings
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ground {
    Valid,
    /// Coordinates that do not parse
    Corrupt,
    /// No GroundSurface element at all
    Missing,
}

pub struct BuildingSpec {
    pub gml_id: Option<String>,
    pub x0: f64,
    pub y0: f64,
    pub z0: f64,
    pub ground: Ground,
}

impl BuildingSpec {
    pub fn new(gml_id: &str, index: usize) -> Self {
        Self {
            gml_id: Some(gml_id.to_string()),
            x0: BASE_X + 100.0 * index as f64,
            y0: BASE_Y,
            z0: 30.0,
            ground: Ground::Valid,
        }
    }

    pub fn ground(mut self, ground: Ground) -> Self {
        self.ground = ground;
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.gml_id = None;
        self
    }
}

fn pos_list(points: &[Point3]) -> String {
    let mut closed = points.to_vec();
    closed.push(points[0]);
    closed
        .iter()
        .map(|p| format!("{} {} {}", p[0], p[1], p[2]))
        .collect::<Vec<_>>()
        .join(" ")
}

fn polygon(coordinates: &str) -> String {
    format!(
        "<gml:Polygon><gml:exterior><gml:LinearRing><gml:posList>{}</gml:posList></gml:LinearRing></gml:exterior></gml:Polygon>",
        coordinates
    )
}

fn surface(kind: &str, coordinates: &str) -> String {
    format!(
        "<bldg:boundedBy><bldg:{kind}><bldg:lod2MultiSurface><gml:MultiSurface><gml:surfaceMember>{}</gml:surfaceMember></gml:MultiSurface></bldg:lod2MultiSurface></bldg:{kind}></bldg:boundedBy>",
        polygon(coordinates),
        kind = kind
    )
}

/// 10 m box with outward-facing boundary surfaces
pub fn building_xml(spec: &BuildingSpec) -> String {
    let (s, h) = (10.0, 12.0);
    let p = |x: f64, y: f64, z: f64| [spec.x0 + x, spec.y0 + y, spec.z0 + z];

    let ground = [p(0.0, 0.0, 0.0), p(0.0, s, 0.0), p(s, s, 0.0), p(s, 0.0, 0.0)];
    let roof = [p(0.0, 0.0, h), p(s, 0.0, h), p(s, s, h), p(0.0, s, h)];
    let walls = [
        [p(0.0, 0.0, 0.0), p(s, 0.0, 0.0), p(s, 0.0, h), p(0.0, 0.0, h)],
        [p(s, 0.0, 0.0), p(s, s, 0.0), p(s, s, h), p(s, 0.0, h)],
        [p(s, s, 0.0), p(0.0, s, 0.0), p(0.0, s, h), p(s, s, h)],
        [p(0.0, s, 0.0), p(0.0, 0.0, 0.0), p(0.0, 0.0, h), p(0.0, s, h)],
    ];

    let mut xml = match &spec.gml_id {
        Some(id) => format!("<bldg:Building gml:id=\"{}\">", id),
        None => "<bldg:Building>".to_string(),
    };
    match spec.ground {
        Ground::Valid => xml.push_str(&surface("GroundSurface", &pos_list(&ground))),
        Ground::Corrupt => xml.push_str(&surface("GroundSurface", "0 0 north 1 0 0 1 1 0")),
        Ground::Missing => {}
    }
    for wall in &walls {
        xml.push_str(&surface("WallSurface", &pos_list(wall)));
    }
    xml.push_str(&surface("RoofSurface", &pos_list(&roof)));
    xml.push_str("</bldg:Building>");
    xml
}

/// Full CityGML document holding the given buildings
pub fn citygml(buildings: &[BuildingSpec]) -> String {
    let mut doc = String::from(concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        "\n",
        r#"<core:CityModel xmlns:core="http://www.opengis.net/citygml/2.0" "#,
        r#"xmlns:bldg="http://www.opengis.net/citygml/building/2.0" "#,
        r#"xmlns:gml="http://www.opengis.net/gml">"#,
        "\n"
    ));
    for building in buildings {
        let _ = writeln!(
            doc,
            "  <core:cityObjectMember>{}</core:cityObjectMember>",
            building_xml(building)
        );
    }
    doc.push_str("</core:CityModel>\n");
    doc
}

/// Buildings `B0..B{n-1}` with valid ground surfaces
pub fn buildings(n: usize) -> Vec<BuildingSpec> {
    (0..n).map(|i| BuildingSpec::new(&format!("B{}", i), i)).collect()
}

pub fn write_input(dir: &Path, buildings: &[BuildingSpec]) -> PathBuf {
    let path = dir.join("input.gml");
    std::fs::write(&path, citygml(buildings)).expect("write fixture");
    path
}

pub fn job_config(input: &Path, output: &Path) -> JobConfig {
    JobConfig {
        input_path: input.to_path_buf(),
        output_path: output.to_path_buf(),
        crs_code: "EPSG:32633".to_string(),
        proj4: UTM33.to_string(),
        prefix: None,
        elevation: Some(ServiceEndpoint {
            url: "http://elevation.invalid".to_string(),
            api_key: None,
        }),
        places: None,
        attribution: Some("Test data".to_string()),
        license: Some("CC-BY".to_string()),
        created_at: Utc::now(),
    }
}

pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        poll_interval_ms: 10,
        split_settle_ms: 0,
        shutdown_grace_ms: 2_000,
        lease_secs: 600,
        max_deliveries: 5,
        idle_pull_ms: 5,
    }
}

pub struct FixedElevation {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ElevationLookup for FixedElevation {
    async fn height(
        &self,
        _endpoint: &ServiceEndpoint,
        _lon_lat: [f64; 2],
    ) -> Result<f64, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FAKE_ELEVATION)
    }
}

pub struct FixedGazetteer;

#[async_trait]
impl Gazetteer for FixedGazetteer {
    async fn lookup(
        &self,
        _endpoint: &ServiceEndpoint,
        lon_lat: [f64; 2],
    ) -> Result<Vec<Value>, CapabilityError> {
        Ok(vec![json!({"name": "Testville", "near": lon_lat})])
    }
}

/// Writes a minimal COLLADA document instead of running a converter
pub struct FakeConverter {
    pub formats: Vec<String>,
}

#[async_trait]
impl ModelConverter for FakeConverter {
    fn formats(&self) -> &[String] {
        &self.formats
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), CapabilityError> {
        if !input.exists() {
            return Err(CapabilityError::Conversion(format!("{} missing", input.display())));
        }
        tokio::fs::write(
            output,
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<COLLADA version=\"1.4.1\"></COLLADA>\n",
        )
        .await?;
        Ok(())
    }
}

/// Ear clipping that throws for rings at or east of `fail_from_x`
pub struct SelectiveTriangulator {
    pub fail_from_x: f64,
}

impl Triangulator for SelectiveTriangulator {
    fn triangulate(&self, ring: &[Point3]) -> Result<Vec<Triangle>, CapabilityError> {
        if ring.first().map_or(false, |p| p[0] >= self.fail_from_x) {
            return Err(CapabilityError::Geometry("triangulation exploded".to_string()));
        }
        EarClipping.triangulate(ring)
    }
}

pub fn capabilities() -> Capabilities {
    Capabilities {
        validator: Arc::new(NormalShellValidator::default()),
        triangulator: Arc::new(EarClipping),
        elevation: Arc::new(FixedElevation {
            calls: AtomicUsize::new(0),
        }),
        gazetteer: Arc::new(FixedGazetteer),
        exporter: Arc::new(ObjExporter),
        converter: Arc::new(FakeConverter {
            formats: vec!["dae".to_string()],
        }),
    }
}

pub fn context() -> PipelineContext {
    PipelineContext::in_memory(fast_timing())
}

pub async fn create_job(ctx: &PipelineContext, config: JobConfig) -> Job {
    JobRegistry::new(ctx.store.clone())
        .create(config)
        .await
        .expect("create job")
}

/// One worker per stage
pub fn workers(ctx: &PipelineContext, capabilities: &Capabilities) -> Vec<StageWorker> {
    Stage::ALL
        .iter()
        .map(|stage| StageWorker::new(ctx.clone(), stages::handler_for(*stage, capabilities)))
        .collect()
}

/// Run workers in pipeline order until every queue is empty
///
/// `after_each` sees the context after every processed delivery.
pub async fn drain_with<F>(workers: &[StageWorker], ctx: &PipelineContext, mut after_each: F) -> usize
where
    F: FnMut(&PipelineContext) -> futures::future::BoxFuture<'static, ()>,
{
    let mut processed = 0;
    loop {
        let mut progressed = false;
        for worker in workers {
            while worker.process_next().await.expect("worker step") {
                processed += 1;
                progressed = true;
                after_each(ctx).await;
            }
        }
        if !progressed {
            return processed;
        }
    }
}

pub async fn drain(workers: &[StageWorker], ctx: &PipelineContext) -> usize {
    drain_with(workers, ctx, |_| Box::pin(async {})).await
}

pub fn read_json(path: &Path) -> Value {
    let raw = std::fs::read(path).unwrap_or_else(|e| panic!("read {}: {}", path.display(), e));
    serde_json::from_slice(&raw).expect("valid JSON")
}

pub fn feature_ids(index: &Value) -> Vec<String> {
    let mut ids: Vec<String> = index["features"]
        .as_array()
        .expect("features array")
        .iter()
        .map(|f| f["properties"]["id"].as_str().unwrap_or_default().to_string())
        .collect();
    ids.sort();
    ids
}
