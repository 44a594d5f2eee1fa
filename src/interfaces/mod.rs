//! Interfaces between the back-transformation and the files and programs around it.

use anyhow;

pub mod binaries;
pub mod cli;
pub mod input;

/// Trait for handling an input specification.
pub trait InputHandle {
    /// Handles the input and runs the back-transformation it describes.
    fn handle(&self) -> Result<(), anyhow::Error>;
}
