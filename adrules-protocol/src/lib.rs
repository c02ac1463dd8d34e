pub mod entity;
pub mod metrics;

pub mod prelude {
    pub use crate::entity::{EntityStatus, EntityType, TimePreset};
    pub use crate::metrics::{
        MetricField, MetricUnit, MetricValue, MetricsSnapshot, ParseMetricError,
    };
}
