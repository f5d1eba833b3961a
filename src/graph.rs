//! The request graph: build-time recursion, request state, execution-pass
//! bookkeeping and the cache/backend policies resolved per request.

pub(crate) mod build;
/// One execution pass: task registry, ready queue, progress waits.
pub mod exec;
/// Cache-policy and render-backend resolution.
pub mod policy;
/// The deduplicated per-coordinate render request.
pub mod request;
