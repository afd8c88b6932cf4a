//! Built-in procedures
//!
//! Framework-provided middleware shipped as ordinary [`Procedure`]s: apply
//! them globally through the builder, per controller, or per action exactly
//! like user-written ones. Authentication is deliberately absent; it is a
//! user-written procedure.
//!
//! [`Procedure`]: crate::procedure::Procedure

mod rate_limit;
mod request_id;

pub use rate_limit::{rate_limit, RateLimitKey, RateLimitOptions, RateLimitStatus};
pub use request_id::{request_id, RequestId};
