#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The mention-processing engine: scheduler, HTTP client, batch/user resolution, rate
//! limiters, reply pipeline, and quiet-period activity.

pub mod api;
pub mod batch;
mod endpoints;
mod engine;
pub mod http;
pub mod limiter;
pub mod model;
pub mod pfp;
pub mod pipeline;
pub mod quiet;
pub mod ratelimit;
pub mod target;
mod transform;

pub use api::{start_engine, EngineConfig, EngineEvent, EngineHandle, MentionOutcome, StatusSnapshot};
