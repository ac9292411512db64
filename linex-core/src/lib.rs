pub mod ops;

pub mod errors {
    use thiserror::Error;

    use crate::feature::FeatureId;

    /// 几何构造与几何运算的错误。
    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum GeometryError {
        #[error("geometry construction failed: {0}")]
        Construction(String),
        #[error("spatial reference mismatch: expected wkid {expected}, found wkid {found}")]
        SpatialReferenceMismatch { expected: u32, found: u32 },
        #[error("expected exactly one intersection point, found {count}")]
        AmbiguousIntersection { count: usize },
    }

    impl GeometryError {
        pub fn construction(message: impl Into<String>) -> Self {
            Self::Construction(message.into())
        }
    }

    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum CollectionError {
        #[error("duplicate feature id {0}")]
        DuplicateId(FeatureId),
        #[error("field `{0}` is not part of the collection schema")]
        UnknownField(String),
        #[error("field `{0}` is the identifier and cannot be rewritten")]
        ReadOnlyField(String),
        #[error(transparent)]
        Geometry(#[from] GeometryError),
    }
}

pub mod geometry {
    use std::fmt;

    use glam::DVec2;

    use crate::errors::GeometryError;

    /// 判断两点重合的绝对容差下限。
    pub const ABS_TOLERANCE: f64 = 1e-9;
    const REL_TOLERANCE: f64 = 1e-12;

    /// 随坐标量级放大的容差：投影坐标常见 1e6 量级，固定容差会失效。
    #[inline]
    pub fn tolerance_for(scale: f64) -> f64 {
        ABS_TOLERANCE.max(scale.abs() * REL_TOLERANCE)
    }

    /// 二维点，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn distance(self, other: Point2) -> f64 {
            self.0.distance(other.0)
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }

        /// 坐标最大绝对值，用于推导容差。
        #[inline]
        pub fn magnitude(self) -> f64 {
            self.0.abs().max_element()
        }

        /// 在按量级放大的容差内判断重合。
        #[inline]
        pub fn approx_eq(self, other: Point2) -> bool {
            let tolerance = tolerance_for(self.magnitude().max(other.magnitude()));
            self.0.abs_diff_eq(other.0, tolerance)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        #[inline]
        pub fn scaled(self, factor: f64) -> Self {
            Self(self.0 * factor)
        }

        #[inline]
        pub fn dot(self, other: Vector2) -> f64 {
            self.0.dot(other.0)
        }

        /// 二维叉积（z 分量）。
        #[inline]
        pub fn perp_dot(self, other: Vector2) -> f64 {
            self.0.perp_dot(other.0)
        }
    }

    /// 线性单位，缓冲半径与空间参考都以它声明长度。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum LinearUnit {
        Meters,
        Kilometers,
        Feet,
        UsSurveyFeet,
        NauticalMiles,
    }

    impl LinearUnit {
        /// 每单位对应的米数。
        pub fn meters(self) -> f64 {
            match self {
                LinearUnit::Meters => 1.0,
                LinearUnit::Kilometers => 1_000.0,
                LinearUnit::Feet => 0.3048,
                LinearUnit::UsSurveyFeet => 1_200.0 / 3_937.0,
                LinearUnit::NauticalMiles => 1_852.0,
            }
        }

        /// 宽松解析单位名称，兼容单复数与常见缩写。
        pub fn parse(name: &str) -> Option<Self> {
            let normalized = name.trim().to_ascii_lowercase().replace([' ', '-'], "_");
            match normalized.as_str() {
                "m" | "meter" | "meters" | "metre" | "metres" => Some(LinearUnit::Meters),
                "km" | "kilometer" | "kilometers" | "kilometre" | "kilometres" => {
                    Some(LinearUnit::Kilometers)
                }
                "ft" | "foot" | "feet" => Some(LinearUnit::Feet),
                "us_ft" | "us_survey_foot" | "us_survey_feet" => Some(LinearUnit::UsSurveyFeet),
                "nmi" | "nautical_mile" | "nautical_miles" => Some(LinearUnit::NauticalMiles),
                _ => None,
            }
        }
    }

    impl fmt::Display for LinearUnit {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let name = match self {
                LinearUnit::Meters => "meters",
                LinearUnit::Kilometers => "kilometers",
                LinearUnit::Feet => "feet",
                LinearUnit::UsSurveyFeet => "us_survey_feet",
                LinearUnit::NauticalMiles => "nautical_miles",
            };
            f.write_str(name)
        }
    }

    const PROJECTED_REFERENCES: &[(u32, &str, LinearUnit)] = &[
        (3857, "WGS 84 / Pseudo-Mercator", LinearUnit::Meters),
        (102100, "WGS 84 / Pseudo-Mercator", LinearUnit::Meters),
        (900913, "Google Maps Global Mercator", LinearUnit::Meters),
        (3395, "WGS 84 / World Mercator", LinearUnit::Meters),
        (2193, "NZGD2000 / New Zealand Transverse Mercator 2000", LinearUnit::Meters),
        (27700, "OSGB36 / British National Grid", LinearUnit::Meters),
        (3035, "ETRS89-extended / LAEA Europe", LinearUnit::Meters),
        (28992, "Amersfoort / RD New", LinearUnit::Meters),
        (2154, "RGF93 v1 / Lambert-93", LinearUnit::Meters),
        (2227, "NAD83 / California zone 3 (ftUS)", LinearUnit::UsSurveyFeet),
        (2263, "NAD83 / New York Long Island (ftUS)", LinearUnit::UsSurveyFeet),
    ];

    const GEOGRAPHIC_REFERENCES: &[u32] = &[4326, 4269, 4258, 4283, 4167, 4490];

    /// 平面空间参考。仅解析投影坐标系，地理坐标系无法做平面缓冲。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SpatialReference {
        wkid: u32,
        unit: LinearUnit,
    }

    impl SpatialReference {
        pub fn from_wkid(wkid: u32) -> Result<Self, GeometryError> {
            if GEOGRAPHIC_REFERENCES.contains(&wkid) {
                return Err(GeometryError::construction(format!(
                    "wkid {wkid} is a geographic reference; planar buffering needs a projected one"
                )));
            }
            if utm_zone(wkid).is_some() {
                return Ok(Self {
                    wkid,
                    unit: LinearUnit::Meters,
                });
            }
            PROJECTED_REFERENCES
                .iter()
                .find(|(code, _, _)| *code == wkid)
                .map(|(_, _, unit)| Self { wkid, unit: *unit })
                .ok_or_else(|| {
                    GeometryError::construction(format!("unknown spatial reference wkid {wkid}"))
                })
        }

        #[inline]
        pub fn wkid(self) -> u32 {
            self.wkid
        }

        #[inline]
        pub fn unit(self) -> LinearUnit {
            self.unit
        }

        pub fn name(self) -> String {
            if let Some((zone, north)) = utm_zone(self.wkid) {
                let hemisphere = if north { 'N' } else { 'S' };
                return format!("WGS 84 / UTM zone {zone}{hemisphere}");
            }
            PROJECTED_REFERENCES
                .iter()
                .find(|(code, _, _)| *code == self.wkid)
                .map(|(_, name, _)| (*name).to_string())
                .unwrap_or_default()
        }

        /// 把 `unit` 声明的距离换算为本参考的坐标单位；`None` 表示已是坐标单位。
        pub fn to_map_units(self, distance: f64, unit: Option<LinearUnit>) -> f64 {
            match unit {
                Some(unit) if unit != self.unit => distance * unit.meters() / self.unit.meters(),
                _ => distance,
            }
        }

        pub fn ensure_same(self, other: SpatialReference) -> Result<(), GeometryError> {
            if self.wkid == other.wkid {
                Ok(())
            } else {
                Err(GeometryError::SpatialReferenceMismatch {
                    expected: self.wkid,
                    found: other.wkid,
                })
            }
        }
    }

    impl fmt::Display for SpatialReference {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} (wkid {})", self.name(), self.wkid)
        }
    }

    fn utm_zone(wkid: u32) -> Option<(u32, bool)> {
        match wkid {
            32601..=32660 => Some((wkid - 32600, true)),
            32701..=32760 => Some((wkid - 32700, false)),
            _ => None,
        }
    }

    /// 有序点列构成的连通路径，至少两个顶点。
    #[derive(Debug, Clone, PartialEq)]
    pub struct Polyline {
        points: Vec<Point2>,
        spatial_reference: SpatialReference,
    }

    impl Polyline {
        pub fn new(
            points: impl IntoIterator<Item = Point2>,
            spatial_reference: SpatialReference,
        ) -> Result<Self, GeometryError> {
            let points: Vec<Point2> = points.into_iter().collect();
            if points.len() < 2 {
                return Err(GeometryError::construction(format!(
                    "polyline needs at least 2 points, got {}",
                    points.len()
                )));
            }
            if let Some(bad) = points.iter().find(|point| !point.is_finite()) {
                return Err(GeometryError::construction(format!(
                    "polyline vertex ({}, {}) is not finite",
                    bad.x(),
                    bad.y()
                )));
            }
            Ok(Self {
                points,
                spatial_reference,
            })
        }

        #[inline]
        pub fn points(&self) -> &[Point2] {
            &self.points
        }

        #[inline]
        pub fn spatial_reference(&self) -> SpatialReference {
            self.spatial_reference
        }

        #[inline]
        pub fn start(&self) -> Point2 {
            self.points[0]
        }

        #[inline]
        pub fn end(&self) -> Point2 {
            self.points[self.points.len() - 1]
        }

        #[inline]
        pub fn is_closed(&self) -> bool {
            self.start().approx_eq(self.end())
        }

        pub fn segments(&self) -> impl Iterator<Item = (Point2, Point2)> + '_ {
            self.points.windows(2).map(|pair| (pair[0], pair[1]))
        }

        pub fn length(&self) -> f64 {
            self.segments().map(|(a, b)| a.distance(b)).sum()
        }

        /// 边界点集：起点（索引 0）与终点（索引 1）。闭合折线没有边界。
        pub fn boundary(&self) -> Boundary {
            let points = if self.is_closed() {
                Vec::new()
            } else {
                vec![self.start(), self.end()]
            };
            Boundary {
                points,
                spatial_reference: self.spatial_reference,
            }
        }
    }

    /// 折线的边界点集。
    #[derive(Debug, Clone, PartialEq)]
    pub struct Boundary {
        points: Vec<Point2>,
        spatial_reference: SpatialReference,
    }

    impl Boundary {
        #[inline]
        pub fn point(&self, index: usize) -> Option<Point2> {
            self.points.get(index).copied()
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.points.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.points.is_empty()
        }

        #[inline]
        pub fn spatial_reference(&self) -> SpatialReference {
            self.spatial_reference
        }
    }

    /// 一个或多个折线部件，union 的结果类型。
    #[derive(Debug, Clone, PartialEq)]
    pub struct MultiPolyline {
        parts: Vec<Polyline>,
    }

    impl MultiPolyline {
        pub fn from_parts(parts: Vec<Polyline>) -> Result<Self, GeometryError> {
            let Some(first) = parts.first() else {
                return Err(GeometryError::construction("multipolyline needs at least one part"));
            };
            let reference = first.spatial_reference();
            for part in &parts[1..] {
                reference.ensure_same(part.spatial_reference())?;
            }
            Ok(Self { parts })
        }

        #[inline]
        pub fn parts(&self) -> &[Polyline] {
            &self.parts
        }

        #[inline]
        pub fn is_single_part(&self) -> bool {
            self.parts.len() == 1
        }

        #[inline]
        pub fn spatial_reference(&self) -> SpatialReference {
            self.parts[0].spatial_reference()
        }

        pub fn segments(&self) -> impl Iterator<Item = (Point2, Point2)> + '_ {
            self.parts.iter().flat_map(Polyline::segments)
        }

        pub fn length(&self) -> f64 {
            self.parts.iter().map(Polyline::length).sum()
        }
    }

    impl From<Polyline> for MultiPolyline {
        fn from(value: Polyline) -> Self {
            Self { parts: vec![value] }
        }
    }

    /// 点的圆形缓冲区，精确保存圆心与半径。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct BufferRegion {
        center: Point2,
        radius: f64,
        spatial_reference: SpatialReference,
    }

    impl BufferRegion {
        pub fn around(
            center: Point2,
            radius: f64,
            spatial_reference: SpatialReference,
        ) -> Result<Self, GeometryError> {
            if !radius.is_finite() || radius < 0.0 {
                return Err(GeometryError::construction(format!(
                    "buffer radius must be a non-negative number, got {radius}"
                )));
            }
            if !center.is_finite() {
                return Err(GeometryError::construction("buffer center is not finite"));
            }
            Ok(Self {
                center,
                radius,
                spatial_reference,
            })
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            self.center
        }

        #[inline]
        pub fn radius(&self) -> f64 {
            self.radius
        }

        #[inline]
        pub fn spatial_reference(&self) -> SpatialReference {
            self.spatial_reference
        }
    }
}

pub mod feature {
    use std::collections::{BTreeMap, HashMap};
    use std::fmt;

    use serde::Deserialize;

    use crate::errors::{CollectionError, GeometryError};
    use crate::geometry::{MultiPolyline, Polyline, SpatialReference};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct FeatureId(i64);

    impl FeatureId {
        #[inline]
        pub fn new(raw: i64) -> Self {
            Self(raw)
        }

        /// 提供原始数值，便于序列化或日志输出。
        #[inline]
        pub fn get(self) -> i64 {
            self.0
        }
    }

    impl fmt::Display for FeatureId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    /// 属性表中的单个取值。
    #[derive(Debug, Clone, PartialEq)]
    pub enum AttributeValue {
        Null,
        Bool(bool),
        Integer(i64),
        Float(f64),
        Text(String),
    }

    impl AttributeValue {
        #[inline]
        pub fn is_null(&self) -> bool {
            matches!(self, AttributeValue::Null)
        }

        /// 数值视图；文本若能解析为数字也会被接受。
        pub fn as_f64(&self) -> Option<f64> {
            match self {
                AttributeValue::Integer(value) => Some(*value as f64),
                AttributeValue::Float(value) => Some(*value),
                AttributeValue::Text(text) => text.trim().parse().ok(),
                AttributeValue::Null | AttributeValue::Bool(_) => None,
            }
        }

        pub fn as_feature_id(&self) -> Option<FeatureId> {
            match self {
                AttributeValue::Integer(value) => Some(FeatureId(*value)),
                AttributeValue::Float(value)
                    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 =>
                {
                    Some(FeatureId(*value as i64))
                }
                AttributeValue::Text(text) => text.trim().parse().ok().map(FeatureId),
                _ => None,
            }
        }
    }

    impl fmt::Display for AttributeValue {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                AttributeValue::Null => f.write_str("null"),
                AttributeValue::Bool(value) => write!(f, "{value}"),
                AttributeValue::Integer(value) => write!(f, "{value}"),
                AttributeValue::Float(value) => write!(f, "{value}"),
                AttributeValue::Text(value) => write!(f, "{value:?}"),
            }
        }
    }

    /// 缓冲距离：固定数值，或按记录从属性字段读取。
    #[derive(Debug, Clone, PartialEq, Deserialize)]
    #[serde(untagged)]
    pub enum BufferDistance {
        Literal(f64),
        Field(String),
    }

    impl fmt::Display for BufferDistance {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                BufferDistance::Literal(value) => write!(f, "{value}"),
                BufferDistance::Field(name) => write!(f, "field `{name}`"),
            }
        }
    }

    /// 一条要素记录：几何、属性与唯一标识。
    #[derive(Debug, Clone, PartialEq)]
    pub struct FeatureRecord {
        pub id: FeatureId,
        pub geometry: MultiPolyline,
        pub attributes: BTreeMap<String, AttributeValue>,
    }

    impl FeatureRecord {
        pub fn new(id: FeatureId, geometry: impl Into<MultiPolyline>) -> Self {
            Self {
                id,
                geometry: geometry.into(),
                attributes: BTreeMap::new(),
            }
        }

        pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
            self.attributes.insert(name.into(), value);
            self
        }

        #[inline]
        pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
            self.attributes.get(name)
        }

        /// 单部件折线视图；多部件几何不在延长模型之内。
        pub fn line(&self) -> Result<&Polyline, GeometryError> {
            if self.geometry.is_single_part() {
                Ok(&self.geometry.parts()[0])
            } else {
                Err(GeometryError::construction(format!(
                    "feature {} has {} parts, only single-part lines can be extended",
                    self.id,
                    self.geometry.parts().len()
                )))
            }
        }
    }

    /// 按标识查询要素的能力。延长算法只通过它访问源数据，避免依赖游标顺序。
    pub trait FeatureSource {
        fn feature(&self, id: FeatureId) -> Option<&FeatureRecord>;
    }

    /// 共享字段结构与空间参考的要素集合。
    #[derive(Debug, Clone)]
    pub struct FeatureCollection {
        name: String,
        id_field: String,
        spatial_reference: SpatialReference,
        fields: Vec<String>,
        records: Vec<FeatureRecord>,
        index: HashMap<FeatureId, usize>,
    }

    impl FeatureCollection {
        /// 创建仅含标识字段的空集合。
        pub fn new(
            name: impl Into<String>,
            id_field: impl Into<String>,
            spatial_reference: SpatialReference,
        ) -> Self {
            let id_field = id_field.into();
            Self {
                name: name.into(),
                fields: vec![id_field.clone()],
                id_field,
                spatial_reference,
                records: Vec::new(),
                index: HashMap::new(),
            }
        }

        #[inline]
        pub fn name(&self) -> &str {
            &self.name
        }

        #[inline]
        pub fn id_field(&self) -> &str {
            &self.id_field
        }

        #[inline]
        pub fn spatial_reference(&self) -> SpatialReference {
            self.spatial_reference
        }

        #[inline]
        pub fn fields(&self) -> &[String] {
            &self.fields
        }

        #[inline]
        pub fn has_field(&self, name: &str) -> bool {
            self.fields.iter().any(|field| field == name)
        }

        /// 追加字段，已存在时返回 `false`。
        pub fn add_field(&mut self, name: impl Into<String>) -> bool {
            let name = name.into();
            if self.has_field(&name) {
                return false;
            }
            self.fields.push(name);
            true
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.records.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.records.is_empty()
        }

        /// 只进游标，按插入顺序遍历。
        #[inline]
        pub fn records(&self) -> impl Iterator<Item = &FeatureRecord> {
            self.records.iter()
        }

        pub fn ids(&self) -> impl Iterator<Item = FeatureId> + '_ {
            self.records.iter().map(|record| record.id)
        }

        /// 写入单个属性值。字段必须已在结构中，标识字段不可改写。
        pub fn set_attribute(
            &mut self,
            id: FeatureId,
            field: &str,
            value: AttributeValue,
        ) -> Result<bool, CollectionError> {
            if field == self.id_field {
                return Err(CollectionError::ReadOnlyField(field.to_string()));
            }
            if !self.has_field(field) {
                return Err(CollectionError::UnknownField(field.to_string()));
            }
            let Some(record) = self.index.get(&id).and_then(|index| self.records.get_mut(*index))
            else {
                return Ok(false);
            };
            record.attributes.insert(field.to_string(), value);
            Ok(true)
        }

        /// 插入记录：标识唯一、属性必须属于字段结构、空间参考一致。
        pub fn insert(&mut self, mut record: FeatureRecord) -> Result<(), CollectionError> {
            if self.index.contains_key(&record.id) {
                return Err(CollectionError::DuplicateId(record.id));
            }
            self.spatial_reference
                .ensure_same(record.geometry.spatial_reference())?;
            if let Some(unknown) = record.attributes.keys().find(|name| !self.has_field(name)) {
                return Err(CollectionError::UnknownField(unknown.clone()));
            }
            record.attributes.insert(
                self.id_field.clone(),
                AttributeValue::Integer(record.id.get()),
            );
            self.index.insert(record.id, self.records.len());
            self.records.push(record);
            Ok(())
        }
    }

    impl FeatureSource for FeatureCollection {
        fn feature(&self, id: FeatureId) -> Option<&FeatureRecord> {
            self.index.get(&id).and_then(|index| self.records.get(*index))
        }
    }
}
