//! CityGML reading
//!
//! Two entry points:
//! - [`BuildingReader`] streams a whole document and yields each
//!   `bldg:Building` element (at any depth) as a self-contained XML fragment
//!   without building a DOM, so arbitrarily large inputs stay in bounded memory.
//! - [`parse_building`] extracts polygon rings from one such fragment.

use polycity_common::models::{Point3, Ring};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// CityGML parsing errors
#[derive(Debug, Error)]
pub enum CitygmlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("Invalid coordinates: {0}")]
    Coordinates(String),
}

fn xml_error(err: impl std::fmt::Display) -> CitygmlError {
    CitygmlError::Xml(err.to_string())
}

/// One building element cut out of the source document
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingFragment {
    /// Zero-based position among the document's buildings
    pub ordinal: u64,
    /// `gml:id` attribute, when present and non-empty
    pub gml_id: Option<String>,
    /// The element serialized back to XML
    pub xml: String,
}

/// Streaming splitter over `bldg:Building` elements
pub struct BuildingReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    next_ordinal: u64,
    finished: bool,
}

impl BuildingReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, CitygmlError> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> BuildingReader<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);
        Self {
            reader,
            buf: Vec::new(),
            next_ordinal: 0,
            finished: false,
        }
    }

    fn next_event(&mut self) -> Result<Event<'static>, CitygmlError> {
        self.buf.clear();
        let event = self
            .reader
            .read_event_into(&mut self.buf)
            .map_err(xml_error)?
            .into_owned();
        Ok(event)
    }

    /// Copy events into a fragment until the element opened by `start` closes
    fn capture(&mut self, start: BytesStart<'static>) -> Result<BuildingFragment, CitygmlError> {
        let gml_id = building_id(&start)?;
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Start(start)).map_err(xml_error)?;

        let mut depth = 1usize;
        while depth > 0 {
            let event = self.next_event()?;
            match &event {
                Event::Start(_) => depth += 1,
                Event::End(_) => depth -= 1,
                Event::Eof => {
                    return Err(CitygmlError::Xml(
                        "document ended inside a building element".to_string(),
                    ))
                }
                _ => {}
            }
            writer.write_event(event).map_err(xml_error)?;
        }

        self.fragment(gml_id, writer.into_inner())
    }

    fn fragment(
        &mut self,
        gml_id: Option<String>,
        bytes: Vec<u8>,
    ) -> Result<BuildingFragment, CitygmlError> {
        let xml = String::from_utf8(bytes).map_err(xml_error)?;
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        Ok(BuildingFragment {
            ordinal,
            gml_id,
            xml,
        })
    }

    fn next_building(&mut self) -> Result<Option<BuildingFragment>, CitygmlError> {
        loop {
            match self.next_event()? {
                Event::Start(start) if is_building(&start) => return self.capture(start).map(Some),
                Event::Empty(start) if is_building(&start) => {
                    let gml_id = building_id(&start)?;
                    let mut writer = Writer::new(Vec::new());
                    writer.write_event(Event::Empty(start)).map_err(xml_error)?;
                    return self.fragment(gml_id, writer.into_inner()).map(Some);
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for BuildingReader<R> {
    type Item = Result<BuildingFragment, CitygmlError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_building() {
            Ok(Some(fragment)) => Some(Ok(fragment)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

fn is_building(start: &BytesStart<'_>) -> bool {
    start.local_name().as_ref() == b"Building"
}

fn building_id(start: &BytesStart<'_>) -> Result<Option<String>, CitygmlError> {
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.local_name().as_ref() == b"id" {
            let value = attr.unescape_value().map_err(xml_error)?;
            let value = value.trim();
            if !value.is_empty() {
                return Ok(Some(value.to_string()));
            }
        }
    }
    Ok(None)
}

/// Polygon rings of one building
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildingGeometry {
    /// Exterior ring of every polygon in the building, ground surfaces included
    pub polygons: Vec<Ring>,
    /// Exterior rings of polygons that belong to a `bldg:GroundSurface`
    pub ground_surfaces: Vec<Ring>,
}

impl BuildingGeometry {
    /// Highest vertex elevation across all ground surfaces
    pub fn max_ground_elevation(&self) -> Option<f64> {
        self.ground_surfaces
            .iter()
            .flatten()
            .map(|p| p[2])
            .fold(None, |max, z| Some(max.map_or(z, |m: f64| m.max(z))))
    }
}

#[derive(Clone, Copy)]
enum Coordinates {
    PosList,
    Pos,
}

/// Extract polygon exterior rings from a building fragment
///
/// Interior rings (holes) are ignored. Closing points that repeat the first
/// point are dropped, so every ring is open.
pub fn parse_building(xml: &str) -> Result<BuildingGeometry, CitygmlError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut geometry = BuildingGeometry::default();
    let mut ground_depth = 0usize;
    let mut in_exterior = false;
    let mut coordinates: Option<Coordinates> = None;
    let mut ring: Ring = Vec::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"GroundSurface" => ground_depth += 1,
                b"exterior" | b"outerBoundaryIs" => {
                    in_exterior = true;
                    ring.clear();
                }
                b"posList" if in_exterior => coordinates = Some(Coordinates::PosList),
                b"pos" if in_exterior => coordinates = Some(Coordinates::Pos),
                _ => {}
            },
            Event::Text(text) => {
                if let Some(kind) = coordinates {
                    let text = text.unescape().map_err(xml_error)?;
                    let points = parse_points(&text)?;
                    if matches!(kind, Coordinates::Pos) && points.len() != 1 {
                        return Err(CitygmlError::Coordinates(format!(
                            "gml:pos must hold one 3D point, got '{}'",
                            text
                        )));
                    }
                    ring.extend(points);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"GroundSurface" => ground_depth = ground_depth.saturating_sub(1),
                b"exterior" | b"outerBoundaryIs" => {
                    in_exterior = false;
                    let exterior = open_ring(std::mem::take(&mut ring));
                    if !exterior.is_empty() {
                        if ground_depth > 0 {
                            geometry.ground_surfaces.push(exterior.clone());
                        }
                        geometry.polygons.push(exterior);
                    }
                }
                b"posList" | b"pos" => coordinates = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(geometry)
}

/// Whitespace-separated coordinate triples
fn parse_points(text: &str) -> Result<Vec<Point3>, CitygmlError> {
    let values = text
        .split_whitespace()
        .map(|v| {
            v.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .ok_or_else(|| CitygmlError::Coordinates(format!("'{}' is not a number", v)))
        })
        .collect::<Result<Vec<f64>, _>>()?;

    if values.len() % 3 != 0 {
        return Err(CitygmlError::Coordinates(format!(
            "{} values do not form 3D points",
            values.len()
        )));
    }

    Ok(values.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
}

fn open_ring(mut ring: Ring) -> Ring {
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    ring
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<core:CityModel xmlns:core="http://www.opengis.net/citygml/2.0"
                xmlns:bldg="http://www.opengis.net/citygml/building/2.0"
                xmlns:gml="http://www.opengis.net/gml">
  <core:cityObjectMember>
    <bldg:Building gml:id="B1">
      <bldg:boundedBy>
        <bldg:GroundSurface>
          <bldg:lod2MultiSurface><gml:MultiSurface><gml:surfaceMember>
            <gml:Polygon><gml:exterior><gml:LinearRing>
              <gml:posList>0 0 10 4 0 10 4 4 10 0 4 10 0 0 10</gml:posList>
            </gml:LinearRing></gml:exterior></gml:Polygon>
          </gml:surfaceMember></gml:MultiSurface></bldg:lod2MultiSurface>
        </bldg:GroundSurface>
      </bldg:boundedBy>
      <bldg:boundedBy>
        <bldg:RoofSurface>
          <gml:Polygon><gml:exterior><gml:LinearRing>
            <gml:pos>0 0 20</gml:pos><gml:pos>0 4 20</gml:pos><gml:pos>4 4 20</gml:pos>
          </gml:LinearRing></gml:exterior></gml:Polygon>
        </bldg:RoofSurface>
      </bldg:boundedBy>
    </bldg:Building>
  </core:cityObjectMember>
  <core:cityObjectMember>
    <bldg:Building/>
  </core:cityObjectMember>
</core:CityModel>"#;

    #[test]
    fn test_reader_yields_each_building() {
        let fragments: Vec<_> = BuildingReader::new(DOC.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].ordinal, 0);
        assert_eq!(fragments[0].gml_id.as_deref(), Some("B1"));
        assert!(fragments[0].xml.starts_with("<bldg:Building"));
        assert!(fragments[0].xml.ends_with("</bldg:Building>"));
        assert_eq!(fragments[1].ordinal, 1);
        assert_eq!(fragments[1].gml_id, None);
    }

    #[test]
    fn test_truncated_document_is_an_error() {
        let truncated = &DOC[..DOC.find("</bldg:RoofSurface>").unwrap()];
        let results: Vec<_> = BuildingReader::new(truncated.as_bytes()).collect();
        assert!(results.last().unwrap().is_err());
    }

    #[test]
    fn test_fragment_geometry() {
        let fragment = BuildingReader::new(DOC.as_bytes()).next().unwrap().unwrap();
        let geometry = parse_building(&fragment.xml).unwrap();

        assert_eq!(geometry.polygons.len(), 2);
        // Closing point dropped
        assert_eq!(geometry.polygons[0].len(), 4);
        assert_eq!(geometry.polygons[1].len(), 3);
        assert_eq!(geometry.ground_surfaces.len(), 1);
        assert_eq!(geometry.max_ground_elevation(), Some(10.0));
    }

    #[test]
    fn test_bad_coordinates_rejected() {
        let xml = r#"<bldg:Building><gml:Polygon><gml:exterior><gml:LinearRing>
            <gml:posList>0 0 zero 1 1 1</gml:posList>
        </gml:LinearRing></gml:exterior></gml:Polygon></bldg:Building>"#;
        assert!(matches!(parse_building(xml), Err(CitygmlError::Coordinates(_))));

        let short = r#"<bldg:Building><gml:Polygon><gml:exterior><gml:LinearRing>
            <gml:posList>0 0 0 1 1</gml:posList>
        </gml:LinearRing></gml:exterior></gml:Polygon></bldg:Building>"#;
        assert!(parse_building(short).is_err());
    }

    #[test]
    fn test_no_ground_surface() {
        let xml = r#"<bldg:Building><gml:Polygon><gml:exterior><gml:LinearRing>
            <gml:posList>0 0 0 1 0 0 1 1 0</gml:posList>
        </gml:LinearRing></gml:exterior></gml:Polygon></bldg:Building>"#;
        let geometry = parse_building(xml).unwrap();
        assert!(geometry.ground_surfaces.is_empty());
        assert_eq!(geometry.max_ground_elevation(), None);
    }
}
