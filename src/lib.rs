pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod registry;
pub mod response;
pub mod server;
pub mod throttle_config;
pub mod throttler;
pub mod token_bucket;

pub use config::Config;
pub use error::{SubmitError, ThrottleError, ThrottleResult};
pub use events::{RejectReason, ThrottleEvent};
pub use registry::ThrottlerRegistry;
pub use response::ApiResponse;
pub use server::create_app;
pub use throttle_config::{ConfigUpdate, ThrottleConfig};
pub use throttler::{SubmitFuture, ThrottleStatus, Throttler};
