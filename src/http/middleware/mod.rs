pub mod metrics;
pub mod rate_limit;

pub use metrics::track_metrics;
pub use rate_limit::{rate_limit_middleware, RouteGuard};
