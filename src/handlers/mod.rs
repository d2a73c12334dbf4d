pub mod metrics_handler;
pub mod users;
