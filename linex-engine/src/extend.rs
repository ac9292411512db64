use linex_core::errors::GeometryError;
use linex_core::feature::{BufferDistance, FeatureId, FeatureRecord, FeatureSource};
use linex_core::geometry::{
    Boundary, BufferRegion, LinearUnit, MultiPolyline, Point2, Polyline, SpatialReference,
};
use linex_core::ops::{intersect_points, reflect_point, union};
use tracing::{debug, trace};

use crate::errors::ExtendError;

/// 折线端点：起点索引 0，终点索引 1。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Start,
    End,
}

impl Endpoint {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Endpoint::Start => 0,
            Endpoint::End => 1,
        }
    }
}

/// 一次运行共用的延长参数。
#[derive(Debug, Clone)]
pub struct ExtensionParams {
    pub start: BufferDistance,
    pub end: BufferDistance,
    /// 缓冲距离的声明单位，`None` 表示空间参考的坐标单位。
    pub unit: Option<LinearUnit>,
    pub spatial_reference: SpatialReference,
}

impl ExtensionParams {
    /// 解析记录在指定端点的缓冲半径，并换算为坐标单位。
    /// 字段值为 null 时视为 0，即该端不延长。
    pub fn radius_for(
        &self,
        record: &FeatureRecord,
        endpoint: Endpoint,
    ) -> Result<f64, ExtendError> {
        let distance = match endpoint {
            Endpoint::Start => &self.start,
            Endpoint::End => &self.end,
        };
        let raw = match distance {
            BufferDistance::Literal(value) => *value,
            BufferDistance::Field(field) => {
                let value = record.attribute(field).ok_or_else(|| {
                    ExtendError::MissingBufferField {
                        id: record.id,
                        field: field.clone(),
                    }
                })?;
                if value.is_null() {
                    debug!(id = record.id.get(), field = %field, "缓冲字段为空，端点不延长");
                    0.0
                } else {
                    value
                        .as_f64()
                        .ok_or_else(|| ExtendError::InvalidBufferValue {
                            id: record.id,
                            field: field.clone(),
                            value: value.to_string(),
                        })?
                }
            }
        };
        Ok(self.spatial_reference.to_map_units(raw, self.unit))
    }
}

/// 取出边界上指定索引的端点，并构造其圆形缓冲区。
pub fn endpoint_buffer(
    boundary: &Boundary,
    index: usize,
    radius: f64,
    spatial_reference: SpatialReference,
) -> Result<(BufferRegion, Point2), GeometryError> {
    spatial_reference.ensure_same(boundary.spatial_reference())?;
    if index > 1 {
        return Err(GeometryError::construction(format!(
            "endpoint index must be 0 or 1, got {index}"
        )));
    }
    let center = boundary.point(index).ok_or_else(|| {
        GeometryError::construction("polyline boundary is empty (closed line has no endpoints)")
    })?;
    let buffer = BufferRegion::around(center, radius, spatial_reference)?;
    trace!(
        x = center.x(),
        y = center.y(),
        radius,
        "端点缓冲区构造完成"
    );
    Ok((buffer, center))
}

/// 生成一端的延长线段：`[延长点, 原端点]`。
///
/// 缓冲区边界与按标识选出的源折线求交，必须恰好得到一个交点；
/// 延长点是该交点关于端点的反射。半径为 0 时直接返回零长度线段。
pub fn extension_segment<S>(
    source: &S,
    boundary: &Boundary,
    index: usize,
    radius: f64,
    spatial_reference: SpatialReference,
    id: FeatureId,
) -> Result<Polyline, ExtendError>
where
    S: FeatureSource + ?Sized,
{
    let (buffer, center) = endpoint_buffer(boundary, index, radius, spatial_reference)
        .map_err(|source| ExtendError::geometry(id, source))?;

    if radius == 0.0 {
        return Polyline::new([center, center], spatial_reference)
            .map_err(|source| ExtendError::geometry(id, source));
    }

    let feature = source
        .feature(id)
        .ok_or(ExtendError::FeatureNotFound { id })?;
    let line = feature
        .line()
        .map_err(|source| ExtendError::geometry(id, source))?;
    let points =
        intersect_points(&buffer, line).map_err(|source| ExtendError::geometry(id, source))?;

    let [intersection] = points.as_slice() else {
        return Err(ExtendError::geometry(
            id,
            GeometryError::AmbiguousIntersection {
                count: points.len(),
            },
        ));
    };

    let extension = reflect_point(center, *intersection);
    debug!(
        id = id.get(),
        index,
        x = extension.x(),
        y = extension.y(),
        "延长点已计算"
    );
    Polyline::new([extension, center], spatial_reference)
        .map_err(|source| ExtendError::geometry(id, source))
}

/// 计算记录两端的延长线段，并与原折线合并。
pub fn extend_record<S>(
    source: &S,
    record: &FeatureRecord,
    params: &ExtensionParams,
) -> Result<MultiPolyline, ExtendError>
where
    S: FeatureSource + ?Sized,
{
    let id = record.id;
    let reference = params.spatial_reference;
    let line = record
        .line()
        .map_err(|source| ExtendError::geometry(id, source))?;
    reference
        .ensure_same(line.spatial_reference())
        .map_err(|source| ExtendError::geometry(id, source))?;

    let boundary = line.boundary();
    let start_radius = params.radius_for(record, Endpoint::Start)?;
    let end_radius = params.radius_for(record, Endpoint::End)?;

    let first = extension_segment(
        source,
        &boundary,
        Endpoint::Start.index(),
        start_radius,
        reference,
        id,
    )?;
    let last = extension_segment(
        source,
        &boundary,
        Endpoint::End.index(),
        end_radius,
        reference,
        id,
    )?;

    let merged =
        union(&record.geometry, &first).map_err(|source| ExtendError::geometry(id, source))?;
    union(&merged, &last).map_err(|source| ExtendError::geometry(id, source))
}

#[cfg(test)]
mod tests {
    use linex_core::feature::{AttributeValue, FeatureCollection};

    use super::*;

    fn sr() -> SpatialReference {
        SpatialReference::from_wkid(3857).unwrap()
    }

    fn line(points: &[(f64, f64)]) -> Polyline {
        Polyline::new(points.iter().map(|(x, y)| Point2::new(*x, *y)), sr()).unwrap()
    }

    fn collection_with(record: FeatureRecord) -> FeatureCollection {
        let mut collection = FeatureCollection::new("lines", "LineId", sr());
        for field in record.attributes.keys() {
            collection.add_field(field.clone());
        }
        collection.insert(record).unwrap();
        collection
    }

    fn literal(start: f64, end: f64) -> ExtensionParams {
        ExtensionParams {
            start: BufferDistance::Literal(start),
            end: BufferDistance::Literal(end),
            unit: None,
            spatial_reference: sr(),
        }
    }

    #[test]
    fn straight_line_is_extended_at_both_ends() {
        let record = FeatureRecord::new(FeatureId::new(1), line(&[(0.0, 0.0), (10.0, 0.0)]));
        let source = collection_with(record.clone());
        let boundary = record.line().unwrap().boundary();

        let start =
            extension_segment(&source, &boundary, 0, 2.0, sr(), FeatureId::new(1)).unwrap();
        assert!(start.start().approx_eq(Point2::new(-2.0, 0.0)));
        assert!(start.end().approx_eq(Point2::new(0.0, 0.0)));

        let end = extension_segment(&source, &boundary, 1, 3.0, sr(), FeatureId::new(1)).unwrap();
        assert!(end.start().approx_eq(Point2::new(13.0, 0.0)));
        assert!(end.end().approx_eq(Point2::new(10.0, 0.0)));

        let extended = extend_record(&source, &record, &literal(2.0, 3.0)).unwrap();
        assert!(extended.is_single_part());
        let part = &extended.parts()[0];
        assert!(part.start().approx_eq(Point2::new(-2.0, 0.0)));
        assert!(part.end().approx_eq(Point2::new(13.0, 0.0)));
        for point in part.points() {
            assert!(point.y().abs() < 1e-9, "extended line must stay collinear");
        }
    }

    #[test]
    fn extension_length_matches_buffer_radius() {
        let record = FeatureRecord::new(
            FeatureId::new(4),
            line(&[(100.0, 50.0), (103.0, 54.0), (110.0, 54.0)]),
        );
        let source = collection_with(record.clone());
        let boundary = record.line().unwrap().boundary();

        let segment =
            extension_segment(&source, &boundary, 0, 2.5, sr(), FeatureId::new(4)).unwrap();
        assert!((segment.length() - 2.5).abs() < 1e-9);
        // 沿首段方向 (3, 4) 反向延长
        assert!(segment.start().approx_eq(Point2::new(98.5, 48.0)));
    }

    #[test]
    fn zero_radius_produces_degenerate_segment() {
        let record = FeatureRecord::new(FeatureId::new(2), line(&[(0.0, 0.0), (10.0, 0.0)]));
        let source = collection_with(record.clone());
        let boundary = record.line().unwrap().boundary();

        let segment =
            extension_segment(&source, &boundary, 1, 0.0, sr(), FeatureId::new(2)).unwrap();
        assert_eq!(segment.length(), 0.0);

        let extended = extend_record(&source, &record, &literal(0.0, 0.0)).unwrap();
        assert_eq!(extended, record.geometry);
    }

    #[test]
    fn hairpin_line_is_ambiguous() {
        let record = FeatureRecord::new(
            FeatureId::new(3),
            line(&[(0.0, 0.0), (10.0, 0.0), (10.0, 1.0), (0.0, 1.0)]),
        );
        let source = collection_with(record.clone());

        let err = extend_record(&source, &record, &literal(5.0, 0.0)).unwrap_err();
        assert_eq!(
            err.geometry_error(),
            Some(&GeometryError::AmbiguousIntersection { count: 2 })
        );
        assert_eq!(err.feature_id(), FeatureId::new(3));
    }

    #[test]
    fn radius_longer_than_line_finds_no_crossing() {
        let record = FeatureRecord::new(FeatureId::new(5), line(&[(0.0, 0.0), (1.0, 0.0)]));
        let source = collection_with(record.clone());
        let err = extend_record(&source, &record, &literal(4.0, 0.5)).unwrap_err();
        assert_eq!(
            err.geometry_error(),
            Some(&GeometryError::AmbiguousIntersection { count: 0 })
        );
    }

    #[test]
    fn endpoint_buffer_validates_inputs() {
        let boundary = line(&[(0.0, 0.0), (10.0, 0.0)]).boundary();
        assert!(matches!(
            endpoint_buffer(&boundary, 2, 1.0, sr()),
            Err(GeometryError::Construction(_))
        ));
        assert!(matches!(
            endpoint_buffer(&boundary, 0, -1.0, sr()),
            Err(GeometryError::Construction(_))
        ));

        let utm = SpatialReference::from_wkid(32618).unwrap();
        assert!(matches!(
            endpoint_buffer(&boundary, 0, 1.0, utm),
            Err(GeometryError::SpatialReferenceMismatch { .. })
        ));

        let closed = line(&[(0.0, 0.0), (5.0, 5.0), (0.0, 0.0)]).boundary();
        assert!(matches!(
            endpoint_buffer(&closed, 0, 1.0, sr()),
            Err(GeometryError::Construction(_))
        ));

        let (buffer, center) = endpoint_buffer(&boundary, 1, 3.0, sr()).unwrap();
        assert_eq!(center, Point2::new(10.0, 0.0));
        assert_eq!(buffer.radius(), 3.0);
    }

    #[test]
    fn radius_is_read_from_fields_and_converted() {
        let record = FeatureRecord::new(FeatureId::new(6), line(&[(0.0, 0.0), (10_000.0, 0.0)]))
            .with_attribute("StartKm", AttributeValue::Float(1.5))
            .with_attribute("EndKm", AttributeValue::Null);
        let params = ExtensionParams {
            start: BufferDistance::Field("StartKm".into()),
            end: BufferDistance::Field("EndKm".into()),
            unit: Some(LinearUnit::Kilometers),
            spatial_reference: sr(),
        };
        assert!((params.radius_for(&record, Endpoint::Start).unwrap() - 1_500.0).abs() < 1e-9);
        assert_eq!(params.radius_for(&record, Endpoint::End).unwrap(), 0.0);

        let source = collection_with(record.clone());
        let extended = extend_record(&source, &record, &params).unwrap();
        let part = &extended.parts()[0];
        assert!(part.start().approx_eq(Point2::new(-1_500.0, 0.0)));
        assert!(part.end().approx_eq(Point2::new(10_000.0, 0.0)));
    }

    #[test]
    fn missing_or_invalid_buffer_field_is_reported() {
        let record = FeatureRecord::new(FeatureId::new(9), line(&[(0.0, 0.0), (10.0, 0.0)]))
            .with_attribute("Width", AttributeValue::Text("wide".into()));
        let params = ExtensionParams {
            start: BufferDistance::Field("Width".into()),
            end: BufferDistance::Field("Missing".into()),
            unit: None,
            spatial_reference: sr(),
        };
        assert!(matches!(
            params.radius_for(&record, Endpoint::Start),
            Err(ExtendError::InvalidBufferValue { .. })
        ));
        assert!(matches!(
            params.radius_for(&record, Endpoint::End),
            Err(ExtendError::MissingBufferField { field, .. }) if field == "Missing"
        ));
    }

    #[test]
    fn lookup_uses_identifier_not_position() {
        let mut source = FeatureCollection::new("lines", "LineId", sr());
        source
            .insert(FeatureRecord::new(
                FeatureId::new(20),
                line(&[(0.0, 5.0), (10.0, 5.0)]),
            ))
            .unwrap();
        let target = FeatureRecord::new(FeatureId::new(10), line(&[(0.0, 0.0), (10.0, 0.0)]));
        source.insert(target.clone()).unwrap();

        let extended = extend_record(&source, &target, &literal(1.0, 1.0)).unwrap();
        let part = &extended.parts()[0];
        assert!(part.start().approx_eq(Point2::new(-1.0, 0.0)));
        assert!(part.end().approx_eq(Point2::new(11.0, 0.0)));

        let missing = FeatureRecord::new(FeatureId::new(99), line(&[(0.0, 0.0), (10.0, 0.0)]));
        assert_eq!(
            extend_record(&source, &missing, &literal(1.0, 1.0)).unwrap_err(),
            ExtendError::FeatureNotFound {
                id: FeatureId::new(99)
            }
        );
    }
}
