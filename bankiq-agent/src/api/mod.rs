//! HTTP API handlers for bankiq-agent

pub mod admin;
pub mod health;
pub mod jobs;
pub mod stream;
pub mod uploads;

pub use admin::admin_routes;
pub use health::health_routes;
pub use jobs::job_routes;
pub use stream::stream_routes;
pub use uploads::upload_routes;
