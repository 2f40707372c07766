//! # Observability
//!
//! - **Structured logging**: pretty or JSON output through `tracing-subscriber`
//! - **Prometheus metrics**: HTTP requests, submissions, commits and height
//!
//! ```rust,no_run
//! use axum::Router;
//! use tessera_node::observability::{init_logging, metrics_middleware, LogFormat, METRICS};
//!
//! init_logging("info", LogFormat::Pretty);
//! let router: Router = Router::new().layer(axum::middleware::from_fn(metrics_middleware));
//! let text = METRICS.encode().unwrap();
//! ```

mod logging;
mod metrics;
mod middleware;

pub use logging::{init_logging, LogFormat};
pub use metrics::{HttpLabels, MetricsState, METRICS};
pub use middleware::metrics_middleware;
