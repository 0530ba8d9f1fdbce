pub mod fabric;
pub mod forge;
pub mod neoforge;
pub mod quilt;
