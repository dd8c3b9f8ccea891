//! footprint-sinks - concrete destinations for the activity trail
//!
//! - [`TursoActivityStore`]: primary durable store on libSQL, running the
//!   registered pre-write hooks on every write
//! - [`HttpSearchIndex`]: secondary document index reached over HTTP

pub mod error;
pub mod index;
pub mod turso;

pub use error::{Error, Result};
pub use index::HttpSearchIndex;
pub use turso::TursoActivityStore;
