#![allow(dead_code)]
// Constructor registration emits a link_section static.
#![allow(unsafe_code)]

pub mod fixtures;

pub use fixtures::Harness;

#[ctor::ctor]
fn setup() {
    cvr_common::testing::init_global_test_logging();
}

#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        tracing::info!(target: "test", $($arg)*);
    };
}
