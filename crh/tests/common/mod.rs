#![allow(dead_code)]

use std::path::Path;

use crh::HarnessConfig;
use crh::mock::MockPlatform;
use crh::suite::Suite;

#[ctor::ctor]
fn setup() {
    crh_common::testing::init_global_test_logging();
}

#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        tracing::info!(target: "test", $($arg)*);
    };
}

/// Default harness config writing into `dir`.
pub fn config(dir: &Path) -> HarnessConfig {
    HarnessConfig::default().with_results_dir(dir)
}

pub fn suite(platform: MockPlatform, dir: &Path) -> Suite<MockPlatform> {
    Suite::new(platform, config(dir))
}
