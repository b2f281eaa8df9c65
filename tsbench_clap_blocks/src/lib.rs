//! Building blocks for [`clap`]-driven configs.
pub mod target;
pub mod tokio;
