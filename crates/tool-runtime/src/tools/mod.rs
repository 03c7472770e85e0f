//! Built-in tool implementations.
//!
//! Every tool here is an [`ExternalCommandTool`]: one registered binary that
//! receives a whitespace-split argument string.

pub mod external;

pub use external::{k8sgpt, kubectl, ExternalCommandTool};
