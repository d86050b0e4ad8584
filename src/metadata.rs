//! Export of search results as a vector layer.
use chrono::Local;
use geojson::{feature::Id, Feature, FeatureCollection, Geometry, PolygonType, Value as GeoValue};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::error::{Error, Result};
use crate::search::SceneRecord;

const LAYER: &str = "scenes";
const GEOMETRY_COLUMN: &str = "geom";
const SRS_ID: i32 = 4326;
/// "GPKG" as a big-endian integer.
const GPKG_APPLICATION_ID: i32 = 0x4750_4B47;
const GPKG_USER_VERSION: i32 = 10300;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MetadataFormat {
    #[default]
    GeoJson,
    Gpkg,
}

impl MetadataFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::GeoJson => "geojson",
            Self::Gpkg => "gpkg",
        }
    }
}

impl FromStr for MetadataFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "geojson" => Ok(Self::GeoJson),
            "gpkg" | "geopackage" => Ok(Self::Gpkg),
            other => Err(format!("Unknown metadata format: {other}")),
        }
    }
}

/// Writes one feature per scene into a new timestamped file under
/// `destination` and returns its path.
pub fn export(scenes: &[SceneRecord], destination: &Path, format: MetadataFormat) -> Result<PathBuf> {
    let features = scenes
        .iter()
        .map(|scene| {
            let geometry = scene.geometry.clone().ok_or_else(|| {
                Error::Serialization(format!("Scene {} has no footprint", scene.scene_id))
            })?;
            Ok((scene, geometry))
        })
        .collect::<Result<Vec<_>>>()?;

    fs::create_dir_all(destination)?;
    let path = unique_path(destination, format.extension());

    match format {
        MetadataFormat::GeoJson => write_geojson(&features, &path)?,
        MetadataFormat::Gpkg => {
            if let Err(err) = write_gpkg(&features, &path) {
                let _ = fs::remove_file(&path);
                return Err(err);
            }
        }
    }

    info!(path = %path.display(), scenes = scenes.len(), "Metadata written");
    Ok(path)
}

fn unique_path(destination: &Path, extension: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let mut path = destination.join(format!("metadata-{stamp}.{extension}"));
    let mut n = 1;
    while path.exists() {
        path = destination.join(format!("metadata-{stamp}-{n}.{extension}"));
        n += 1;
    }
    path
}

fn scene_properties(scene: &SceneRecord) -> Map<String, Value> {
    let mut properties = scene.properties.clone();
    properties.insert("id".to_string(), Value::String(scene.scene_id.clone()));
    properties
}

fn write_geojson(features: &[(&SceneRecord, Geometry)], path: &Path) -> Result<()> {
    let collection = FeatureCollection {
        bbox: None,
        features: features
            .iter()
            .map(|(scene, geometry)| Feature {
                bbox: None,
                geometry: Some(geometry.clone()),
                id: Some(Id::String(scene.scene_id.clone())),
                properties: Some(scene_properties(scene)),
                foreign_members: None,
            })
            .collect(),
        foreign_members: Some(
            json!({
                "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::4326"}}
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
        ),
    };
    let content = serde_json::to_string_pretty(&collection)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    std::io::Write::write_all(&mut file, content.as_bytes())?;
    Ok(())
}

fn sql_err(err: rusqlite::Error) -> Error {
    Error::Serialization(err.to_string())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Clone, Copy, PartialEq)]
enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Integer),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self::Integer),
            Value::Number(_) => Some(Self::Real),
            _ => Some(Self::Text),
        }
    }

    /// Widens so that mixed integer and real values share a REAL column.
    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Integer, Self::Real) | (Self::Real, Self::Integer) => Self::Real,
            _ => Self::Text,
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

fn sql_value(value: Option<&Value>, column: ColumnType) -> SqlValue {
    match (value, column) {
        (None, _) | (Some(Value::Null), _) => SqlValue::Null,
        (Some(Value::Bool(b)), ColumnType::Integer) => SqlValue::Integer(*b as i64),
        (Some(Value::Number(n)), ColumnType::Integer) => {
            n.as_i64().map(SqlValue::Integer).unwrap_or(SqlValue::Null)
        }
        (Some(Value::Number(n)), ColumnType::Real) => {
            n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null)
        }
        (Some(Value::String(s)), _) => SqlValue::Text(s.clone()),
        (Some(other), _) => SqlValue::Text(other.to_string()),
    }
}

fn write_gpkg(features: &[(&SceneRecord, Geometry)], path: &Path) -> Result<()> {
    let rows = features
        .iter()
        .map(|(scene, geometry)| Ok((scene_properties(scene), gpkg_geometry(geometry)?)))
        .collect::<Result<Vec<_>>>()?;

    // Columns in first-seen order, typed by the values they hold.
    let mut seen: Vec<(String, Option<ColumnType>)> = vec![];
    for (properties, _) in &rows {
        for (key, value) in properties {
            if key == "fid" || key == GEOMETRY_COLUMN {
                continue;
            }
            let kind = ColumnType::of(value);
            match seen.iter_mut().find(|(name, _)| name == key) {
                Some((_, existing)) => {
                    *existing = match (*existing, kind) {
                        (Some(a), Some(b)) => Some(a.merge(b)),
                        (a, b) => a.or(b),
                    }
                }
                None => seen.push((key.clone(), kind)),
            }
        }
    }
    let columns = seen
        .into_iter()
        .map(|(name, kind)| (name, kind.unwrap_or(ColumnType::Text)))
        .collect::<Vec<_>>();

    let mut conn = Connection::open(path).map_err(sql_err)?;
    conn.pragma_update(None, "application_id", GPKG_APPLICATION_ID)
        .map_err(sql_err)?;
    conn.pragma_update(None, "user_version", GPKG_USER_VERSION)
        .map_err(sql_err)?;

    let tx = conn.transaction().map_err(sql_err)?;
    tx.execute_batch(GPKG_SCHEMA).map_err(sql_err)?;

    let column_defs = columns
        .iter()
        .map(|(name, kind)| format!(", {} {}", quote_ident(name), kind.sql()))
        .collect::<String>();
    tx.execute_batch(&format!(
        "CREATE TABLE {LAYER} (fid INTEGER PRIMARY KEY AUTOINCREMENT, {GEOMETRY_COLUMN} GEOMETRY{column_defs});"
    ))
    .map_err(sql_err)?;

    let envelope = rows
        .iter()
        .filter_map(|(_, geometry)| geometry.envelope)
        .reduce(|a, b| [a[0].min(b[0]), a[1].max(b[1]), a[2].min(b[2]), a[3].max(b[3])]);
    let [min_x, max_x, min_y, max_y] = envelope.map(|e| e.map(Some)).unwrap_or([None; 4]);
    tx.execute(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier, min_x, min_y, max_x, max_y, srs_id) \
         VALUES (?1, 'features', ?1, ?2, ?3, ?4, ?5, ?6)",
        params![LAYER, min_x, min_y, max_x, max_y, SRS_ID],
    )
    .map_err(sql_err)?;
    tx.execute(
        "INSERT INTO gpkg_geometry_columns (table_name, column_name, geometry_type_name, srs_id, z, m) \
         VALUES (?1, ?2, 'GEOMETRY', ?3, 0, 0)",
        params![LAYER, GEOMETRY_COLUMN, SRS_ID],
    )
    .map_err(sql_err)?;

    let names = std::iter::once(quote_ident(GEOMETRY_COLUMN))
        .chain(columns.iter().map(|(name, _)| quote_ident(name)))
        .collect::<Vec<_>>();
    let placeholders = (1..=names.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let insert = format!(
        "INSERT INTO {LAYER} ({}) VALUES ({placeholders})",
        names.join(", ")
    );
    {
        let mut stmt = tx.prepare(&insert).map_err(sql_err)?;
        for (properties, geometry) in &rows {
            let values = std::iter::once(SqlValue::Blob(geometry.blob.clone())).chain(
                columns
                    .iter()
                    .map(|(name, kind)| sql_value(properties.get(name), *kind)),
            );
            stmt.execute(params_from_iter(values)).map_err(sql_err)?;
        }
    }
    tx.commit().map_err(sql_err)?;
    Ok(())
}

const GPKG_SCHEMA: &str = "
CREATE TABLE gpkg_spatial_ref_sys (
    srs_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL PRIMARY KEY,
    organization TEXT NOT NULL,
    organization_coordsys_id INTEGER NOT NULL,
    definition TEXT NOT NULL,
    description TEXT
);
INSERT INTO gpkg_spatial_ref_sys VALUES
    ('Undefined cartesian SRS', -1, 'NONE', -1, 'undefined', 'undefined cartesian coordinate reference system'),
    ('Undefined geographic SRS', 0, 'NONE', 0, 'undefined', 'undefined geographic coordinate reference system'),
    ('WGS 84 geodetic', 4326, 'EPSG', 4326,
     'GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563,AUTHORITY[\"EPSG\",\"7030\"]],AUTHORITY[\"EPSG\",\"6326\"]],PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],UNIT[\"degree\",0.0174532925199433,AUTHORITY[\"EPSG\",\"9122\"]],AUTHORITY[\"EPSG\",\"4326\"]]',
     'longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid');
CREATE TABLE gpkg_contents (
    table_name TEXT NOT NULL PRIMARY KEY,
    data_type TEXT NOT NULL,
    identifier TEXT UNIQUE,
    description TEXT DEFAULT '',
    last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    min_x DOUBLE,
    min_y DOUBLE,
    max_x DOUBLE,
    max_y DOUBLE,
    srs_id INTEGER,
    CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
CREATE TABLE gpkg_geometry_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    geometry_type_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL,
    z TINYINT NOT NULL,
    m TINYINT NOT NULL,
    CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
    CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
    CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
";

struct GpkgGeometry {
    blob: Vec<u8>,
    /// [min_x, max_x, min_y, max_y]
    envelope: Option<[f64; 4]>,
}

/// GeoPackage binary: "GP" header with an XY envelope, then little-endian WKB.
fn gpkg_geometry(geometry: &Geometry) -> Result<GpkgGeometry> {
    let mut wkb = vec![];
    let mut envelope: Option<[f64; 4]> = None;
    match &geometry.value {
        GeoValue::Polygon(polygon) => write_wkb_polygon(&mut wkb, polygon, &mut envelope)?,
        GeoValue::MultiPolygon(polygons) => {
            wkb.push(1);
            wkb.extend_from_slice(&6_u32.to_le_bytes());
            wkb.extend_from_slice(&(polygons.len() as u32).to_le_bytes());
            for polygon in polygons {
                write_wkb_polygon(&mut wkb, polygon, &mut envelope)?;
            }
        }
        other => {
            return Err(Error::Serialization(format!(
                "Unsupported footprint type: {}",
                other.type_name()
            )))
        }
    }

    let mut blob = vec![b'G', b'P', 0];
    match envelope {
        Some(env) => {
            // little endian, XY envelope
            blob.push(0b0000_0011);
            blob.extend_from_slice(&SRS_ID.to_le_bytes());
            for v in env {
                blob.extend_from_slice(&v.to_le_bytes());
            }
        }
        None => {
            // little endian, no envelope, empty geometry
            blob.push(0b0001_0001);
            blob.extend_from_slice(&SRS_ID.to_le_bytes());
        }
    }
    blob.extend_from_slice(&wkb);
    Ok(GpkgGeometry { blob, envelope })
}

fn write_wkb_polygon(
    wkb: &mut Vec<u8>,
    polygon: &PolygonType,
    envelope: &mut Option<[f64; 4]>,
) -> Result<()> {
    wkb.push(1);
    wkb.extend_from_slice(&3_u32.to_le_bytes());
    wkb.extend_from_slice(&(polygon.len() as u32).to_le_bytes());
    for ring in polygon {
        wkb.extend_from_slice(&(ring.len() as u32).to_le_bytes());
        for position in ring {
            let (x, y) = match position.as_slice() {
                [x, y, ..] => (*x, *y),
                _ => {
                    return Err(Error::Serialization(format!(
                        "Invalid footprint position: {position:?}"
                    )))
                }
            };
            wkb.extend_from_slice(&x.to_le_bytes());
            wkb.extend_from_slice(&y.to_le_bytes());
            let env = envelope.get_or_insert([x, x, y, y]);
            *env = [env[0].min(x), env[1].max(x), env[2].min(y), env[3].max(y)];
        }
    }
    Ok(())
}
