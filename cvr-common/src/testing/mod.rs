//! Test support shared by the unit tests and the integration suites.

pub mod archive;
pub mod http;
pub mod log;

pub use archive::{TarballBuilder, gzip_bytes};
pub use log::init_global_test_logging;
