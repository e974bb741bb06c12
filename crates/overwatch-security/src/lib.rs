//! Security primitives for the Overwatch control plane.
//!
//! Provides the tamper-evident audit trail every state change and admin action
//! is written to, the principal/privilege model used by the HTTP surface, and
//! token-bucket rate limiting.
//!
//! # Main types
//!
//! - [`AuditTrail`]: Append-only, hash-chained record of actions, optionally mirrored to disk.
//! - [`Principal`] / [`Privilege`]: Authenticated caller and its privilege level.
//! - [`ApiKeys`]: Maps bearer tokens to principals.
//! - [`RateLimiter`]: Token-bucket rate limiter for request throttling.

/// Hash-chained audit trail.
pub mod audit;
/// Principals, privileges and API key resolution.
pub mod privilege;
/// Token-bucket rate limiting.
pub mod rate_limit;

pub use audit::{AuditEntry, AuditOutcome, AuditTrail, ChainBreak};
pub use privilege::{ApiKeys, Principal, Privilege};
pub use rate_limit::RateLimiter;
