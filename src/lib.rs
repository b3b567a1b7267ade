//! Compute Gateway Library
//!
//! Caching facade server for a remote parametric-geometry compute backend.
//!
//! # Features
//!
//! - **Definition registry**: content-hashed definition files with lazy
//!   re-scan
//! - **Solve cache**: deterministic keys over definition identity + inputs,
//!   cache hits never touch the backend
//! - **Wake-retry**: one retry after waking a deallocated backend VM,
//!   transport failures only
//! - **Parameter normalization**: one canonical descriptor shape over the
//!   backend's drifting response formats
//! - **Idle shutdown**: deallocates the backend VM after sustained
//!   inactivity

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod compute;
pub mod config;
pub mod encode;
pub mod error;
pub mod gateway;
pub mod infra;
pub mod params;
pub mod readiness;
pub mod registry;
pub mod solve;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
