//! Proxy validation
//!
//! Probes candidate proxies for reachability of the target service and
//! produces per-proxy success/fail service tags for the assignment stage.

mod validator;

pub use validator::{
    ProbeConfig, ProbeResult, ProxyValidator, ValidatorError, DEFAULT_CHUNK_SIZE,
    DEFAULT_PROBE_TIMEOUT_SECS,
};
