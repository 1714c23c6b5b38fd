//! Reprojection between a job's source coordinate system and WGS84
//!
//! A deliberately small proj4 subset: geographic (`longlat`), `utm` and
//! `tmerc` on an ellipsoid given by name (`WGS84`, `GRS80`) or by `+a`/`+b`
//! or `+a`/`+rf`. Datum shifts are not applied (WGS84 and ETRS89 agree to
//! well under a metre). Transverse Mercator uses Snyder's series
//! (USGS Professional Paper 1395, §8).

use super::CapabilityError;
use std::collections::HashMap;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_RF: f64 = 298.257_223_563;
const GRS80_RF: f64 = 298.257_222_101;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Ellipsoid {
    a: f64,
    /// First eccentricity squared
    e2: f64,
}

impl Ellipsoid {
    fn from_inverse_flattening(a: f64, rf: f64) -> Self {
        let f = 1.0 / rf;
        Self { a, e2: f * (2.0 - f) }
    }

    fn from_axes(a: f64, b: f64) -> Self {
        Self {
            a,
            e2: 1.0 - (b * b) / (a * a),
        }
    }

    /// Meridian arc length from the equator to `phi`
    fn meridian_arc(&self, phi: f64) -> f64 {
        let e2 = self.e2;
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        self.a
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TransverseMercator {
    ellipsoid: Ellipsoid,
    /// Radians
    lat_0: f64,
    /// Radians
    lon_0: f64,
    k_0: f64,
    x_0: f64,
    y_0: f64,
}

impl TransverseMercator {
    fn forward(&self, lon: f64, lat: f64) -> [f64; 2] {
        let Ellipsoid { a, e2 } = self.ellipsoid;
        let ep2 = e2 / (1.0 - e2);
        let phi = lat.to_radians();
        let lambda = lon.to_radians();

        let n = a / (1.0 - e2 * phi.sin().powi(2)).sqrt();
        let t = phi.tan().powi(2);
        let c = ep2 * phi.cos().powi(2);
        let big_a = (lambda - self.lon_0) * phi.cos();

        let x = self.x_0
            + self.k_0
                * n
                * (big_a
                    + (1.0 - t + c) * big_a.powi(3) / 6.0
                    + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * big_a.powi(5) / 120.0);
        let y = self.y_0
            + self.k_0
                * (self.ellipsoid.meridian_arc(phi) - self.ellipsoid.meridian_arc(self.lat_0)
                    + n * phi.tan()
                        * (big_a.powi(2) / 2.0
                            + (5.0 - t + 9.0 * c + 4.0 * c * c) * big_a.powi(4) / 24.0
                            + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2)
                                * big_a.powi(6)
                                / 720.0));
        [x, y]
    }

    fn inverse(&self, x: f64, y: f64) -> [f64; 2] {
        let Ellipsoid { a, e2 } = self.ellipsoid;
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let ep2 = e2 / (1.0 - e2);

        let m = self.ellipsoid.meridian_arc(self.lat_0) + (y - self.y_0) / self.k_0;
        let mu = m / (a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
        let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let sin1 = phi1.sin();
        let c1 = ep2 * phi1.cos().powi(2);
        let t1 = phi1.tan().powi(2);
        let n1 = a / (1.0 - e2 * sin1 * sin1).sqrt();
        let r1 = a * (1.0 - e2) / (1.0 - e2 * sin1 * sin1).powf(1.5);
        let d = (x - self.x_0) / (n1 * self.k_0);

        let phi = phi1
            - (n1 * phi1.tan() / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let lambda = self.lon_0
            + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                    * d.powi(5)
                    / 120.0)
                / phi1.cos();

        [lambda.to_degrees(), phi.to_degrees()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    LongLat,
    TransverseMercator(TransverseMercator),
}

/// A parsed source coordinate system
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    definition: String,
    kind: Kind,
}

impl Projection {
    /// Parse a proj4 definition string
    pub fn from_proj4(definition: &str) -> Result<Self, CapabilityError> {
        let params = parse_params(definition);
        let unsupported =
            |what: String| CapabilityError::Projection(format!("{} in '{}'", what, definition));

        if let Some(units) = params.get("units") {
            if units.as_deref() != Some("m") {
                return Err(unsupported(format!("unsupported units {:?}", units)));
            }
        }

        let proj = params
            .get("proj")
            .and_then(|v| v.as_deref())
            .ok_or_else(|| unsupported("missing +proj".to_string()))?;

        let kind = match proj {
            "longlat" | "latlong" => Kind::LongLat,
            "utm" => {
                let zone: u32 = number(&params, "zone")
                    .map_err(unsupported)?
                    .ok_or_else(|| unsupported("utm without +zone".to_string()))?
                    as u32;
                if !(1..=60).contains(&zone) {
                    return Err(unsupported(format!("utm zone {} out of range", zone)));
                }
                Kind::TransverseMercator(TransverseMercator {
                    ellipsoid: ellipsoid(&params).map_err(unsupported)?,
                    lat_0: 0.0,
                    lon_0: (zone as f64 * 6.0 - 183.0).to_radians(),
                    k_0: 0.9996,
                    x_0: 500_000.0,
                    y_0: if params.contains_key("south") {
                        10_000_000.0
                    } else {
                        0.0
                    },
                })
            }
            "tmerc" => {
                let get = |name: &str, default: f64| -> Result<f64, CapabilityError> {
                    Ok(number(&params, name).map_err(unsupported)?.unwrap_or(default))
                };
                let k_0 = match number(&params, "k_0").map_err(unsupported)? {
                    Some(k) => k,
                    None => get("k", 1.0)?,
                };
                Kind::TransverseMercator(TransverseMercator {
                    ellipsoid: ellipsoid(&params).map_err(unsupported)?,
                    lat_0: get("lat_0", 0.0)?.to_radians(),
                    lon_0: get("lon_0", 0.0)?.to_radians(),
                    k_0,
                    x_0: get("x_0", 0.0)?,
                    y_0: get("y_0", 0.0)?,
                })
            }
            other => return Err(unsupported(format!("unsupported projection '{}'", other))),
        };

        Ok(Self {
            definition: definition.trim().to_string(),
            kind,
        })
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Source coordinates to `[longitude, latitude]`
    pub fn to_geographic(&self, point: [f64; 2]) -> Result<[f64; 2], CapabilityError> {
        let result = match &self.kind {
            Kind::LongLat => point,
            Kind::TransverseMercator(tm) => tm.inverse(point[0], point[1]),
        };
        finite(result, point)
    }

    /// `[longitude, latitude]` to source coordinates
    pub fn from_geographic(&self, lon_lat: [f64; 2]) -> Result<[f64; 2], CapabilityError> {
        let result = match &self.kind {
            Kind::LongLat => lon_lat,
            Kind::TransverseMercator(tm) => tm.forward(lon_lat[0], lon_lat[1]),
        };
        finite(result, lon_lat)
    }
}

fn finite(result: [f64; 2], input: [f64; 2]) -> Result<[f64; 2], CapabilityError> {
    if result.iter().all(|v| v.is_finite()) {
        Ok(result)
    } else {
        Err(CapabilityError::Projection(format!(
            "point {:?} does not reproject to finite coordinates",
            input
        )))
    }
}

/// `+key=value` and bare `+flag` tokens
fn parse_params(definition: &str) -> HashMap<String, Option<String>> {
    definition
        .split_whitespace()
        .filter_map(|token| token.strip_prefix('+'))
        .map(|token| match token.split_once('=') {
            Some((key, value)) => (key.to_string(), Some(value.to_string())),
            None => (token.to_string(), None),
        })
        .collect()
}

fn number(params: &HashMap<String, Option<String>>, name: &str) -> Result<Option<f64>, String> {
    match params.get(name) {
        None => Ok(None),
        Some(None) => Err(format!("+{} needs a value", name)),
        Some(Some(raw)) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("+{}={} is not a number", name, raw)),
    }
}

fn ellipsoid(params: &HashMap<String, Option<String>>) -> Result<Ellipsoid, String> {
    if let Some(a) = number(params, "a")? {
        if let Some(b) = number(params, "b")? {
            return Ok(Ellipsoid::from_axes(a, b));
        }
        if let Some(rf) = number(params, "rf")? {
            return Ok(Ellipsoid::from_inverse_flattening(a, rf));
        }
        return Err("+a given without +b or +rf".to_string());
    }

    let name = params
        .get("ellps")
        .or_else(|| params.get("datum"))
        .and_then(|v| v.as_deref())
        .unwrap_or("WGS84");
    match name {
        "WGS84" => Ok(Ellipsoid::from_inverse_flattening(WGS84_A, WGS84_RF)),
        "GRS80" | "ETRS89" => Ok(Ellipsoid::from_inverse_flattening(WGS84_A, GRS80_RF)),
        other => Err(format!("unsupported ellipsoid '{}'", other)),
    }
}
