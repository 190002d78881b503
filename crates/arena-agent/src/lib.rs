pub mod config;
pub mod docker;
pub mod error;
pub mod error_payload;
pub mod http;
pub mod manager;
pub mod metrics;
pub mod port_alloc;
pub mod readiness;
pub mod registry;
pub mod runtime;

#[cfg(test)]
mod test_support;
