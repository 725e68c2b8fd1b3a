//! Process supervision for pdibuild
//!
//! Three pieces every build goes through: the [`CancelToken`] observed at
//! each suspension point, the [`Runner`] that launches and supervises
//! external tools, and the [`Downloader`] with its process-wide cache.

pub mod cancel;
pub mod download;
pub mod process;

pub use cancel::CancelToken;
pub use download::Downloader;
pub use process::{OutputMode, Runner};
