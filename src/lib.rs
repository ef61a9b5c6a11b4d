//! Frontgate - a TLS-terminating front door for internally-hosted services
//!
//! This library provides a single-process gateway that:
//! - Terminates TLS for a configured set of hostnames
//! - Provisions and renews certificates automatically via ACME (TLS-ALPN-01),
//!   refusing issuance for any hostname outside the routing table
//! - Gates all traffic behind a shared-secret session cookie with a
//!   bootstrap URL for first contact
//! - Forwards authorized requests to backend services selected by hostname
//! - Exposes a start/stop lifecycle with bounded-deadline graceful shutdown

pub mod acme;
pub mod config;
pub mod error;
pub mod gate;
pub mod proxy;
pub mod routes;
pub mod server;
