use std::io::Write;

use pretty_assertions::assert_eq;

use crate::config::{load_config_from_file, ClassConfig, Config, VmLimits};

fn config_from_str(toml: &str) -> Result<Config, figment::Error> {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(toml.as_bytes()).unwrap();
    load_config_from_file(file.path())
}

#[test]
fn defaults() {
    let config = Config::default();

    assert_eq!(
        config.vm,
        VmLimits {
            max_states: 16384,
            max_bytecode: 49152,
            max_counters: 4,
            max_mark_pairs: 32,
            max_guards: 4096,
        }
    );

    assert_eq!(config.classes, ClassConfig { search_path: None });
}

#[test]
fn empty_file() {
    assert_eq!(config_from_str("").unwrap(), Config::default());
}

#[test]
fn overrides() {
    let config = config_from_str(
        r#"
[vm]
max_states = 1000
max_counters = 2

[classes]
search_path = "/usr/share/jsre/classes"
"#,
    )
    .unwrap();

    assert_eq!(config.vm.max_states, 1000);
    assert_eq!(config.vm.max_counters, 2);
    assert_eq!(config.vm.max_bytecode, 49152);
    assert_eq!(config.vm.max_mark_pairs, 32);
    assert_eq!(
        config.classes.search_path.as_deref(),
        Some(std::path::Path::new("/usr/share/jsre/classes"))
    );
}

#[test]
fn clamped_limits() {
    let config = config_from_str(
        r#"
[vm]
max_mark_pairs = 40
max_states = 100000
"#,
    )
    .unwrap();

    assert_eq!(config.vm.max_mark_pairs, 32);
    assert_eq!(config.vm.max_states, 0xFFFF);
}

#[test]
fn unknown_field() {
    assert!(config_from_str(
        r#"
[vm]
max_threads = 10
"#
    )
    .is_err());
}

#[test]
fn missing_file() {
    assert!(load_config_from_file(std::path::Path::new(
        "/nonexistent/jsre.toml"
    ))
    .is_err());
}
