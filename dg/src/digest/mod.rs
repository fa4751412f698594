//! Digesters and their registry
//!
//! A digester turns one catalog file into one or more named digest rows.
//! Registration order is execution order; a digester that reads another
//! digester's output must be registered after it.

mod builtin;
mod error;
mod registry;
mod traits;

pub use builtin::{TEXT_CONTENT, TextContentDigester, WORD_STATS, WordStats, WordStatsDigester, builtin_digesters};
pub use error::DigestError;
pub use registry::{DigesterInfo, DigesterRegistry, RegistryError};
pub use traits::{DigestContext, DigestOutput, Digester, upstream_is_newer};
