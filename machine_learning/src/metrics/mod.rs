mod metric;
mod reducer;
mod summary;

pub use metric::{LOSS_KEY, Metric, Metrics, accuracy};
pub use reducer::MetricReducer;
pub use summary::{EpochResult, MetricSummary, RunningAverage};
