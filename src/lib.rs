//! Heatline core library: per-line profiling annotations for open editor documents.

mod config;
mod error;
mod heatmap;
mod process;
mod render;
mod session;
mod stats;
mod surface;
mod sync;

pub use config::*;
pub use error::*;
pub use heatmap::*;
pub use process::*;
pub use render::*;
pub use session::*;
pub use stats::*;
pub use surface::*;
pub use sync::*;
