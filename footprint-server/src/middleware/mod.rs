//! HTTP middleware

mod attribution;

pub use attribution::{HeaderActorExtractor, attribution_middleware};
