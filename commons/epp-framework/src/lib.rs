pub mod datalayer;
pub mod error;
pub mod plugin;

pub use error::*;
pub use plugin::*;

pub use tokio_util::sync::CancellationToken;
