//! Forge: installer jar, install profile, and processors.

pub mod installer;
pub mod parser;
pub mod processor;

pub use installer::{ForgeFlavor, ForgeInstaller, FORGE};
pub use processor::{ForgeProcessorEngine, ProcessorPaths, ProcessorReport};
