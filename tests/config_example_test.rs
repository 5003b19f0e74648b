//! The shipped example settings file stays loadable and in step with the defaults.

use std::path::Path;
use traverse_daq::config::Settings;

#[test]
fn test_example_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/traverse.example.toml");
    let settings = Settings::load(Some(&path)).expect("example config loads");
    assert_eq!(settings, Settings::default());
}
