pub mod catalog;
pub mod config_store;
pub mod installer;
pub mod java;
pub mod launcher;
pub mod maven;
pub mod template;

pub use catalog::{Installation, InstallationCatalog, ServerDescriptor};
pub use installer::types::{LoaderDescriptor, ModloaderType};
pub use maven::MavenCoordinate;
