#![no_main]
use libfuzzer_sys::fuzz_target;

// Coefficient CSVs come from the operator; reading one must never panic.
fuzz_target!(|data: &[u8]| {
    let dir = std::env::temp_dir().join(format!("stm-fuzz-{}", std::process::id()));
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    let path = dir.join("sections.csv");
    if std::fs::write(&path, data).is_ok() {
        let _ = stm_config::load_sections_csv(&path);
    }
});
