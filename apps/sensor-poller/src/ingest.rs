mod classify;
mod metrics;
mod normalize;
mod state;
mod window;


pub use classify::{
    classify, classify_aqi, classify_comfort, AirQualityCategory, AlertLevel, ComfortBand,
    ComfortLevel, InvalidThresholds, ThresholdBounds, ThresholdConfig,
};
pub use metrics::{derive, format_change, ChannelSnapshot, DerivedSnapshot, MetricEngine, Trend};
pub use normalize::{normalize, ChannelParser, ChannelSpec};
pub use state::{PipelineState, RetentionPolicy};
pub use window::{filter_by_label, filter_window, LookbackWindow};
