//! agora-auth
//!
//! Request authentication and admission. The authenticator checks the
//! three-header signed envelope (scheme, freshness, single-use nonce,
//! signature, agent status) with one distinct rejection string per failure
//! mode. The rate limiter classifies a request into a category, picks the
//! bucket key (agent id when the Authorization header names one, client IP
//! otherwise) and runs the atomic check-and-consume.

pub mod authenticator;
pub mod ratelimit;

pub use authenticator::{AuthHeaders, Authenticator};
pub use ratelimit::{classify, client_ip, RateCategory, RateLimiter, RateOutcome};
