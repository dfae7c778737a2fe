//! Cabourotte: a health-check daemon.
//!
//! The daemon schedules user-defined checks (DNS, TCP, TLS, HTTP, command)
//! concurrently, each on its own periodic task, and fans the results out to
//! an in-memory last-value store, Prometheus metrics and push exporters. The
//! active check set is reconciled from independent sources: the YAML
//! configuration file (reloaded on SIGHUP), the HTTP management API and
//! pull-based HTTP service discovery.

pub mod api;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod discovery;
pub mod exporter;
pub mod healthcheck;
pub mod memorystore;
pub mod metrics;
pub mod registry;
