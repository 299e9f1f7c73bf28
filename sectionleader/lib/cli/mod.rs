//! Command-line interface of the `sectionleader` binary.

mod args;

/// Terminal styling for help output.
pub mod styles;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use args::*;
