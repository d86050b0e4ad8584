//! Resolution of an area of interest into a single validated geometry.
use geojson::{GeoJson, Geometry, PolygonType, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Area of interest used for every query of a run. Only constructed through
/// `resolve`, so the geometry is always a valid (multi)polygon.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    geometry: Geometry,
    crs: Option<String>,
}

impl Region {
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Coordinate reference name from a legacy `crs` member, if the input had one.
    pub fn crs(&self) -> Option<&str> {
        self.crs.as_deref()
    }
}

/// Accepted forms of region input.
#[derive(Clone, Debug)]
pub enum GeometryInput {
    Path(PathBuf),
    Json(serde_json::Value),
}

impl GeometryInput {
    /// Interprets a command line argument: inline GeoJSON if it looks like a
    /// JSON object, otherwise a path to a boundary file.
    pub fn from_arg(arg: &str) -> Result<Self> {
        let trimmed = arg.trim();
        if trimmed.starts_with('{') {
            let value = serde_json::from_str(trimmed)
                .map_err(|e| Error::InvalidGeometry(format!("Malformed inline GeoJSON: {e}")))?;
            return Ok(Self::Json(value));
        }
        Ok(Self::Path(PathBuf::from(trimmed)))
    }
}

impl From<serde_json::Value> for GeometryInput {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<&Path> for GeometryInput {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

pub fn resolve(input: &GeometryInput) -> Result<Region> {
    let value = match input {
        GeometryInput::Path(path) => read_boundary_file(path)?,
        GeometryInput::Json(value) => value.clone(),
    };
    let crs = extract_crs(&value);
    let geojson = GeoJson::from_json_value(value)
        .map_err(|e| Error::InvalidGeometry(format!("Not a GeoJSON object: {e}")))?;

    let polygons = collect_polygons(&geojson)?;
    let geometry = match polygons.len() {
        0 => return Err(Error::InvalidGeometry("Geometry is empty".to_string())),
        1 => Geometry::new(Value::Polygon(polygons.into_iter().flatten().collect())),
        _ => Geometry::new(Value::MultiPolygon(polygons)),
    };
    Ok(Region { geometry, crs })
}

fn read_boundary_file(path: &Path) -> Result<serde_json::Value> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("geojson") | Some("json") => {}
        _ => {
            return Err(Error::InvalidGeometry(format!(
                "Unsupported boundary file {}: only GeoJSON (.geojson, .json) is read",
                path.display()
            )))
        }
    }
    let content = fs::read_to_string(path).map_err(|e| {
        Error::InvalidGeometry(format!("Unable to read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| Error::InvalidGeometry(format!("Malformed GeoJSON in {}: {e}", path.display())))
}

fn extract_crs(value: &serde_json::Value) -> Option<String> {
    value
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()
        .map(str::to_owned)
}

fn collect_polygons(geojson: &GeoJson) -> Result<Vec<PolygonType>> {
    let mut polygons = vec![];
    match geojson {
        GeoJson::Geometry(geometry) => push_geometry(geometry, &mut polygons)?,
        GeoJson::Feature(feature) => {
            let geometry = feature
                .geometry
                .as_ref()
                .ok_or_else(|| Error::InvalidGeometry("Feature has no geometry".to_string()))?;
            push_geometry(geometry, &mut polygons)?;
        }
        GeoJson::FeatureCollection(collection) => {
            for feature in &collection.features {
                let geometry = feature.geometry.as_ref().ok_or_else(|| {
                    Error::InvalidGeometry("Feature has no geometry".to_string())
                })?;
                push_geometry(geometry, &mut polygons)?;
            }
        }
    }
    Ok(polygons)
}

fn push_geometry(geometry: &Geometry, polygons: &mut Vec<PolygonType>) -> Result<()> {
    match &geometry.value {
        Value::Polygon(polygon) => {
            validate_polygon(polygon)?;
            polygons.push(polygon.clone());
        }
        Value::MultiPolygon(members) => {
            for polygon in members {
                validate_polygon(polygon)?;
                polygons.push(polygon.clone());
            }
        }
        Value::GeometryCollection(members) => {
            for member in members {
                push_geometry(member, polygons)?;
            }
        }
        other => {
            return Err(Error::InvalidGeometry(format!(
                "Unsupported geometry type: {}",
                other.type_name()
            )))
        }
    }
    Ok(())
}

fn validate_polygon(polygon: &PolygonType) -> Result<()> {
    if polygon.is_empty() {
        return Err(Error::InvalidGeometry("Polygon has no rings".to_string()));
    }
    for ring in polygon {
        if ring.len() < 4 {
            return Err(Error::InvalidGeometry(format!(
                "Ring has {} positions, at least 4 are required",
                ring.len()
            )));
        }
        for position in ring {
            if position.len() < 2 || position.iter().any(|c| !c.is_finite()) {
                return Err(Error::InvalidGeometry(format!(
                    "Invalid position: {position:?}"
                )));
            }
            let (lon, lat) = (position[0], position[1]);
            if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
                return Err(Error::InvalidGeometry(format!(
                    "Position out of range: {position:?}"
                )));
            }
        }
        if ring.first() != ring.last() {
            return Err(Error::InvalidGeometry("Ring is not closed".to_string()));
        }
    }
    Ok(())
}
