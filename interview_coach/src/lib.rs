mod resume;
mod routes;
mod server;
mod telemetry;

#[cfg(test)]
mod test_support;

pub mod app;
pub mod config;

pub use app::start_app;
