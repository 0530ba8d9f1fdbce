pub mod cache;
pub mod hardware;
pub mod hash;
pub mod process;
pub mod redact;
pub mod version;
