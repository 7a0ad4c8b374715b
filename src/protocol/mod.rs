pub mod backend;
pub mod storage;

pub use backend::{HttpBackend, HttpBackendConfig};
pub use storage::HttpStorage;
