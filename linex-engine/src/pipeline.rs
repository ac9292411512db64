use linex_core::feature::{FeatureCollection, FeatureId};
use linex_core::geometry::MultiPolyline;
use tracing::{debug, info, warn};

use crate::errors::ExtendError;
use crate::extend::{ExtensionParams, extend_record};

/// 单条记录失败时的处理策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordErrorPolicy {
    /// 记录警告并原样输出该记录的几何。
    #[default]
    Skip,
    /// 遇到第一条失败记录即终止整次运行。
    Abort,
}

/// 输出候选：标识 + 合并后的几何。
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedFeature {
    pub id: FeatureId,
    pub geometry: MultiPolyline,
    pub extended: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub id: FeatureId,
    pub reason: String,
}

/// 运行结果的三种状态之二；"失败"以错误返回。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Complete,
    CompletedWithSkips,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub total: usize,
    pub extended: usize,
    pub skipped: Vec<SkippedRecord>,
}

impl RunReport {
    pub fn outcome(&self) -> RunOutcome {
        if self.skipped.is_empty() {
            RunOutcome::Complete
        } else {
            RunOutcome::CompletedWithSkips
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtensionRun {
    pub features: Vec<ExtendedFeature>,
    pub report: RunReport,
}

/// 批量延长：按游标顺序遍历输入集合，逐条延长并收集到内存。
pub struct LineExtender<'a> {
    params: &'a ExtensionParams,
    policy: RecordErrorPolicy,
}

impl<'a> LineExtender<'a> {
    pub fn new(params: &'a ExtensionParams, policy: RecordErrorPolicy) -> Self {
        Self { params, policy }
    }

    pub fn run(&self, input: &FeatureCollection) -> Result<ExtensionRun, ExtendError> {
        info!(
            collection = input.name(),
            records = input.len(),
            start = %self.params.start,
            end = %self.params.end,
            "开始延长折线"
        );

        let mut features = Vec::with_capacity(input.len());
        let mut report = RunReport {
            total: input.len(),
            ..RunReport::default()
        };

        for record in input.records() {
            match extend_record(input, record, self.params) {
                Ok(geometry) => {
                    debug!(id = record.id.get(), parts = geometry.parts().len(), "记录延长完成");
                    report.extended += 1;
                    features.push(ExtendedFeature {
                        id: record.id,
                        geometry,
                        extended: true,
                    });
                }
                Err(err) => match self.policy {
                    RecordErrorPolicy::Abort => {
                        warn!(id = record.id.get(), error = %err, "记录延长失败，按策略终止运行");
                        return Err(err);
                    }
                    RecordErrorPolicy::Skip => {
                        warn!(id = record.id.get(), error = %err, "记录延长失败，保留原几何");
                        report.skipped.push(SkippedRecord {
                            id: record.id,
                            reason: err.to_string(),
                        });
                        features.push(ExtendedFeature {
                            id: record.id,
                            geometry: record.geometry.clone(),
                            extended: false,
                        });
                    }
                },
            }
        }

        info!(
            total = report.total,
            extended = report.extended,
            skipped = report.skipped.len(),
            "所有延长计算完成"
        );
        Ok(ExtensionRun { features, report })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use linex_core::errors::GeometryError;
    use linex_core::feature::{BufferDistance, FeatureRecord};
    use linex_core::geometry::{Point2, Polyline, SpatialReference};

    use super::*;

    fn sr() -> SpatialReference {
        SpatialReference::from_wkid(32633).unwrap()
    }

    fn line(points: &[(f64, f64)]) -> Polyline {
        Polyline::new(points.iter().map(|(x, y)| Point2::new(*x, *y)), sr()).unwrap()
    }

    fn sample_collection() -> FeatureCollection {
        let mut collection = FeatureCollection::new("roads", "RoadId", sr());
        collection
            .insert(FeatureRecord::new(
                FeatureId::new(11),
                line(&[(500_000.0, 4_000_000.0), (500_100.0, 4_000_000.0)]),
            ))
            .unwrap();
        // 只有 0.5 米长，2 米缓冲无法与其相交
        collection
            .insert(FeatureRecord::new(
                FeatureId::new(12),
                line(&[(500_000.0, 4_000_010.0), (500_000.5, 4_000_010.0)]),
            ))
            .unwrap();
        collection
            .insert(FeatureRecord::new(
                FeatureId::new(13),
                line(&[(500_000.0, 4_000_020.0), (500_000.0, 4_000_120.0)]),
            ))
            .unwrap();
        collection
    }

    fn params() -> ExtensionParams {
        ExtensionParams {
            start: BufferDistance::Literal(2.0),
            end: BufferDistance::Literal(3.0),
            unit: None,
            spatial_reference: sr(),
        }
    }

    #[test]
    fn skip_policy_keeps_identifier_bijection() {
        let input = sample_collection();
        let params = params();
        let run = LineExtender::new(&params, RecordErrorPolicy::Skip)
            .run(&input)
            .expect("skip policy never fails");

        let input_ids: BTreeSet<_> = input.ids().collect();
        let output_ids: BTreeSet<_> = run.features.iter().map(|feature| feature.id).collect();
        assert_eq!(input_ids, output_ids);
        assert_eq!(run.features.len(), input.len());

        assert_eq!(run.report.total, 3);
        assert_eq!(run.report.extended, 2);
        assert_eq!(run.report.skipped.len(), 1);
        assert_eq!(run.report.skipped[0].id, FeatureId::new(12));
        assert_eq!(run.report.outcome(), RunOutcome::CompletedWithSkips);

        let skipped = run
            .features
            .iter()
            .find(|feature| feature.id == FeatureId::new(12))
            .unwrap();
        assert!(!skipped.extended);

        let vertical = run
            .features
            .iter()
            .find(|feature| feature.id == FeatureId::new(13))
            .unwrap();
        assert!((vertical.geometry.length() - 105.0).abs() < 1e-6);
    }

    #[test]
    fn abort_policy_stops_at_first_failure() {
        let input = sample_collection();
        let params = params();
        let err = LineExtender::new(&params, RecordErrorPolicy::Abort)
            .run(&input)
            .unwrap_err();
        assert_eq!(err.feature_id(), FeatureId::new(12));
        assert_eq!(
            err.geometry_error(),
            Some(&GeometryError::AmbiguousIntersection { count: 0 })
        );
    }

    #[test]
    fn clean_input_completes() {
        let mut input = FeatureCollection::new("roads", "RoadId", sr());
        input
            .insert(FeatureRecord::new(
                FeatureId::new(1),
                line(&[(0.0, 0.0), (10.0, 0.0)]),
            ))
            .unwrap();
        let params = params();
        let run = LineExtender::new(&params, RecordErrorPolicy::default())
            .run(&input)
            .unwrap();
        assert_eq!(run.report.outcome(), RunOutcome::Complete);
        assert!((run.features[0].geometry.length() - 15.0).abs() < 1e-9);
    }
}
