pub mod assertions;
pub mod fixtures;
pub mod logging;

pub use assertions::{assert_contains, assert_path_exists};
pub use fixtures::CliEnv;
pub use logging::init_test_logging;
