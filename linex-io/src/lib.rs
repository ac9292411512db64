use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use linex_core::errors::CollectionError;
use linex_core::feature::{AttributeValue, FeatureCollection, FeatureId, FeatureRecord};
use linex_core::geometry::{MultiPolyline, Point2, Polyline, SpatialReference};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::{debug, info};

const COLLECTION_EXTENSION: &str = "geojson";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read collection {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write collection {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse collection {path:?}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid collection {path:?}: {message}")]
    InvalidCollection { path: PathBuf, message: String },
    #[error("collection {path:?} declares wkid {found}, expected wkid {expected}")]
    SpatialReferenceMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },
    #[error("schema error: {0}")]
    Schema(String),
    #[error("join failed: {0}")]
    Join(String),
}

pub trait CollectionLoader {
    fn load(&self, path: &Path) -> Result<FeatureCollection, PersistenceError>;
}

pub trait CollectionSaver {
    fn save(&self, collection: &FeatureCollection, path: &Path) -> Result<(), PersistenceError>;
}

/// 输入/输出集合所在的工作目录。
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 解析集合名称为文件路径。绝对路径原样使用；相对名称只取最后一个
    /// `\` 之后的部分并放到工作目录下，缺少扩展名时补上 `.geojson`。
    pub fn collection_path(&self, name: &str) -> PathBuf {
        let raw = Path::new(name);
        let mut path = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            let last = name.rsplit('\\').next().unwrap_or(name);
            self.root.join(last)
        };
        if path.extension().is_none() {
            path.set_extension(COLLECTION_EXTENSION);
        }
        path
    }
}

/// 集合名称取文件名主干。
pub fn collection_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// 创建输出集合：几何 + 标识字段。
pub fn create_output(
    name: &str,
    id_field: &str,
    spatial_reference: SpatialReference,
) -> Result<FeatureCollection, PersistenceError> {
    if name.trim().is_empty() {
        return Err(PersistenceError::Schema(
            "output collection name is empty".to_string(),
        ));
    }
    if id_field.trim().is_empty() {
        return Err(PersistenceError::Schema(
            "identifier field name is empty".to_string(),
        ));
    }
    debug!(collection = name, id_field, wkid = spatial_reference.wkid(), "创建输出集合");
    Ok(FeatureCollection::new(name, id_field, spatial_reference))
}

/// 只进插入游标，作用域内独占输出集合。
pub struct InsertCursor<'a> {
    target: &'a mut FeatureCollection,
    inserted: usize,
}

impl<'a> InsertCursor<'a> {
    pub fn new(target: &'a mut FeatureCollection) -> Self {
        Self {
            target,
            inserted: 0,
        }
    }

    pub fn insert_row(
        &mut self,
        id: FeatureId,
        geometry: MultiPolyline,
    ) -> Result<(), PersistenceError> {
        self.target
            .insert(FeatureRecord::new(id, geometry))
            .map_err(|err| PersistenceError::Schema(format!("cannot insert feature {id}: {err}")))?;
        self.inserted += 1;
        Ok(())
    }

    #[inline]
    pub fn inserted(&self) -> usize {
        self.inserted
    }
}

impl Drop for InsertCursor<'_> {
    fn drop(&mut self) {
        debug!(
            collection = self.target.name(),
            inserted = self.inserted,
            "插入游标已释放"
        );
    }
}

/// 按键值等值连接，把 `join_table` 的字段追加到 `target`。
///
/// `fields` 为 `None` 时连接全部字段（连接键本身除外）。与目标已有字段重名时
/// 追加 `_1`、`_2` 后缀。键值重复时取连接表中第一条。返回匹配到的记录数。
pub fn join_field(
    target: &mut FeatureCollection,
    in_field: &str,
    join_table: &FeatureCollection,
    join_key: &str,
    fields: Option<&[String]>,
) -> Result<usize, PersistenceError> {
    if !target.has_field(in_field) {
        return Err(PersistenceError::Join(format!(
            "field `{in_field}` not found in `{}`",
            target.name()
        )));
    }
    if !join_table.has_field(join_key) {
        return Err(PersistenceError::Join(format!(
            "field `{join_key}` not found in `{}`",
            join_table.name()
        )));
    }

    let selected: Vec<String> = match fields {
        Some(fields) => {
            if let Some(missing) = fields.iter().find(|field| !join_table.has_field(field)) {
                return Err(PersistenceError::Join(format!(
                    "field `{missing}` not found in `{}`",
                    join_table.name()
                )));
            }
            fields.to_vec()
        }
        None => join_table.fields().to_vec(),
    };
    let selected: Vec<String> = selected
        .into_iter()
        .filter(|field| field != join_key)
        .collect();

    let mut lookup: HashMap<FeatureId, &FeatureRecord> = HashMap::new();
    for record in join_table.records() {
        if let Some(key) = record.attribute(join_key).and_then(AttributeValue::as_feature_id) {
            lookup.entry(key).or_insert(record);
        }
    }

    let mut mapping: Vec<(String, String)> = Vec::with_capacity(selected.len());
    for field in selected {
        let target_name = free_field_name(target, &field);
        target.add_field(target_name.clone());
        mapping.push((field, target_name));
    }

    let keys: Vec<(FeatureId, Option<FeatureId>)> = target
        .records()
        .map(|record| {
            let key = record
                .attribute(in_field)
                .and_then(AttributeValue::as_feature_id);
            (record.id, key)
        })
        .collect();

    let mut matched = 0;
    for (id, key) in keys {
        let source = key.and_then(|key| lookup.get(&key).copied());
        if source.is_some() {
            matched += 1;
        }
        for (source_field, target_field) in &mapping {
            let value = source
                .and_then(|record| record.attribute(source_field))
                .cloned()
                .unwrap_or(AttributeValue::Null);
            target
                .set_attribute(id, target_field, value)
                .map_err(|err: CollectionError| PersistenceError::Join(err.to_string()))?;
        }
    }

    info!(
        collection = target.name(),
        join_table = join_table.name(),
        fields = mapping.len(),
        matched,
        "属性连接完成"
    );
    Ok(matched)
}

fn free_field_name(collection: &FeatureCollection, field: &str) -> String {
    if !collection.has_field(field) {
        return field.to_string();
    }
    (1..)
        .map(|suffix| format!("{field}_{suffix}"))
        .find(|candidate| !collection.has_field(candidate))
        .unwrap_or_else(|| field.to_string())
}

/// GeoJSON 要素集合读写。
pub struct GeoJsonFacade {
    id_field: String,
    spatial_reference: SpatialReference,
}

impl GeoJsonFacade {
    pub fn new(id_field: impl Into<String>, spatial_reference: SpatialReference) -> Self {
        Self {
            id_field: id_field.into(),
            spatial_reference,
        }
    }

    fn invalid(path: &Path, message: impl Into<String>) -> PersistenceError {
        PersistenceError::InvalidCollection {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    fn check_crs(&self, path: &Path, crs: Option<&GeoJsonCrs>) -> Result<(), PersistenceError> {
        let Some(crs) = crs else {
            return Ok(());
        };
        let found = crs.wkid().ok_or_else(|| {
            Self::invalid(path, format!("unrecognised crs `{}`", crs.properties.name))
        })?;
        if found != self.spatial_reference.wkid() {
            return Err(PersistenceError::SpatialReferenceMismatch {
                path: path.to_path_buf(),
                expected: self.spatial_reference.wkid(),
                found,
            });
        }
        Ok(())
    }

    fn to_geometry(
        &self,
        path: &Path,
        index: usize,
        geometry: GeoJsonGeometry,
    ) -> Result<MultiPolyline, PersistenceError> {
        let parts = match geometry {
            GeoJsonGeometry::LineString(coordinates) => vec![coordinates],
            GeoJsonGeometry::MultiLineString(parts) => parts,
        };
        let mut polylines = Vec::with_capacity(parts.len());
        for coordinates in parts {
            let mut points = Vec::with_capacity(coordinates.len());
            for position in coordinates {
                let [x, y, ..] = position.as_slice() else {
                    return Err(Self::invalid(
                        path,
                        format!("feature #{index} has a position with fewer than 2 values"),
                    ));
                };
                points.push(Point2::new(*x, *y));
            }
            let polyline = Polyline::new(points, self.spatial_reference)
                .map_err(|err| Self::invalid(path, format!("feature #{index}: {err}")))?;
            polylines.push(polyline);
        }
        MultiPolyline::from_parts(polylines)
            .map_err(|err| Self::invalid(path, format!("feature #{index}: {err}")))
    }
}

impl CollectionLoader for GeoJsonFacade {
    fn load(&self, path: &Path) -> Result<FeatureCollection, PersistenceError> {
        let data = fs::read_to_string(path).map_err(|source| PersistenceError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let document: GeoJsonCollection =
            serde_json::from_str(&data).map_err(|source| PersistenceError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;
        if document.kind != "FeatureCollection" {
            return Err(Self::invalid(
                path,
                format!("expected a FeatureCollection, found `{}`", document.kind),
            ));
        }
        self.check_crs(path, document.crs.as_ref())?;

        let name = document
            .name
            .clone()
            .unwrap_or_else(|| collection_name(path));
        let mut collection = FeatureCollection::new(name, &self.id_field, self.spatial_reference);

        for feature in &document.features {
            for key in feature.properties.iter().flat_map(|properties| properties.keys()) {
                collection.add_field(key.clone());
            }
        }

        for (index, feature) in document.features.into_iter().enumerate() {
            let geometry = feature
                .geometry
                .ok_or_else(|| Self::invalid(path, format!("feature #{index} has no geometry")))?;
            let geometry = self.to_geometry(path, index, geometry)?;
            let properties = feature.properties.unwrap_or_default();
            let id = properties
                .get(&self.id_field)
                .map(attribute_from_json)
                .and_then(|value| value.as_feature_id())
                .ok_or_else(|| {
                    Self::invalid(
                        path,
                        format!(
                            "feature #{index} has no integer identifier in field `{}`",
                            self.id_field
                        ),
                    )
                })?;

            let mut record = FeatureRecord::new(id, geometry);
            for (key, value) in &properties {
                record
                    .attributes
                    .insert(key.clone(), attribute_from_json(value));
            }
            collection
                .insert(record)
                .map_err(|err| Self::invalid(path, format!("feature #{index}: {err}")))?;
        }

        info!(
            path = %path.display(),
            records = collection.len(),
            fields = collection.fields().len(),
            "读取要素集合完成"
        );
        Ok(collection)
    }
}

impl CollectionSaver for GeoJsonFacade {
    /// 先写临时文件再改名覆盖，失败时目标文件保持原状。
    fn save(&self, collection: &FeatureCollection, path: &Path) -> Result<(), PersistenceError> {
        let features = collection
            .records()
            .map(|record| {
                let properties: Map<String, Value> = collection
                    .fields()
                    .iter()
                    .map(|field| {
                        let value = record
                            .attribute(field)
                            .map(attribute_to_json)
                            .unwrap_or(Value::Null);
                        (field.clone(), value)
                    })
                    .collect();
                GeoJsonFeature {
                    kind: "Feature".to_string(),
                    geometry: Some(GeoJsonGeometry::from(&record.geometry)),
                    properties: Some(properties),
                }
            })
            .collect();

        let document = GeoJsonCollection {
            kind: "FeatureCollection".to_string(),
            name: Some(collection.name().to_string()),
            crs: Some(GeoJsonCrs::for_wkid(collection.spatial_reference().wkid())),
            features,
        };
        let payload = serde_json::to_string_pretty(&document).map_err(|source| {
            PersistenceError::ParseError {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let staging = staging_path(path);
        fs::write(&staging, payload).map_err(|source| PersistenceError::WriteError {
            path: staging.clone(),
            source,
        })?;
        if let Err(source) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(PersistenceError::WriteError {
                path: path.to_path_buf(),
                source,
            });
        }

        info!(path = %path.display(), records = collection.len(), "输出集合已写入");
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn attribute_from_json(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null,
        Value::Bool(flag) => AttributeValue::Bool(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => AttributeValue::Integer(integer),
            None => number
                .as_f64()
                .map(AttributeValue::Float)
                .unwrap_or(AttributeValue::Null),
        },
        Value::String(text) => AttributeValue::Text(text.clone()),
        other => AttributeValue::Text(other.to_string()),
    }
}

fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Bool(flag) => Value::Bool(*flag),
        AttributeValue::Integer(integer) => Value::from(*integer),
        AttributeValue::Float(float) => Number::from_f64(*float)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AttributeValue::Text(text) => Value::String(text.clone()),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeoJsonCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    crs: Option<GeoJsonCrs>,
    features: Vec<GeoJsonFeature>,
}

/// 旧版 GeoJSON 的具名 `crs` 成员。
#[derive(Debug, Serialize, Deserialize)]
struct GeoJsonCrs {
    #[serde(rename = "type")]
    kind: String,
    properties: GeoJsonCrsProperties,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeoJsonCrsProperties {
    name: String,
}

impl GeoJsonCrs {
    fn for_wkid(wkid: u32) -> Self {
        Self {
            kind: "name".to_string(),
            properties: GeoJsonCrsProperties {
                name: format!("EPSG:{wkid}"),
            },
        }
    }

    /// 兼容 `EPSG:3857` 与 `urn:ogc:def:crs:EPSG::3857` 两种写法。
    fn wkid(&self) -> Option<u32> {
        self.properties.name.rsplit(':').next()?.trim().parse().ok()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeoJsonFeature {
    #[serde(rename = "type")]
    kind: String,
    geometry: Option<GeoJsonGeometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
enum GeoJsonGeometry {
    LineString(Vec<Vec<f64>>),
    MultiLineString(Vec<Vec<Vec<f64>>>),
}

impl From<&MultiPolyline> for GeoJsonGeometry {
    fn from(value: &MultiPolyline) -> Self {
        let mut parts: Vec<Vec<Vec<f64>>> = value
            .parts()
            .iter()
            .map(|part| {
                part.points()
                    .iter()
                    .map(|point| vec![point.x(), point.y()])
                    .collect()
            })
            .collect();
        if parts.len() == 1 {
            GeoJsonGeometry::LineString(parts.remove(0))
        } else {
            GeoJsonGeometry::MultiLineString(parts)
        }
    }
}
