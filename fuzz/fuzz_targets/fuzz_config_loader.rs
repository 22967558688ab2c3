#![no_main]
use libfuzzer_sys::fuzz_target;

// Parsing and validation may reject anything; neither may panic.
fuzz_target!(|data: &str| {
    if let Ok(cfg) = treadmill_config::load_toml(data) {
        let _ = cfg.validate();
    }
});
