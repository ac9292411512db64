pub mod extend;
pub mod pipeline;

pub mod errors {
    use linex_core::errors::GeometryError;
    use linex_core::feature::FeatureId;
    use thiserror::Error;

    /// 单条记录延长失败的原因，均带有记录标识。
    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum ExtendError {
        #[error("feature {id}: {source}")]
        Geometry {
            id: FeatureId,
            #[source]
            source: GeometryError,
        },
        #[error("feature {id} not found in source collection")]
        FeatureNotFound { id: FeatureId },
        #[error("feature {id}: buffer field `{field}` is missing")]
        MissingBufferField { id: FeatureId, field: String },
        #[error("feature {id}: buffer field `{field}` holds non-numeric value {value}")]
        InvalidBufferValue {
            id: FeatureId,
            field: String,
            value: String,
        },
    }

    impl ExtendError {
        pub fn geometry(id: FeatureId, source: GeometryError) -> Self {
            Self::Geometry { id, source }
        }

        pub fn feature_id(&self) -> FeatureId {
            match self {
                ExtendError::Geometry { id, .. }
                | ExtendError::FeatureNotFound { id }
                | ExtendError::MissingBufferField { id, .. }
                | ExtendError::InvalidBufferValue { id, .. } => *id,
            }
        }

        /// 若由几何运算引起，返回底层几何错误。
        pub fn geometry_error(&self) -> Option<&GeometryError> {
            match self {
                ExtendError::Geometry { source, .. } => Some(source),
                _ => None,
            }
        }
    }
}
