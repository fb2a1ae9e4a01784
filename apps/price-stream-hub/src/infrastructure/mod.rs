//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the ports defined
//! in the domain and application layers.

/// Topic membership, channel registry, and tick fan-out.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// REST API and WebSocket transport.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Subscription store adapters.
pub mod persistence;

/// OpenTelemetry tracing integration.
pub mod telemetry;
