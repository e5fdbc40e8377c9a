use std::sync::Arc;

use yolocam::{Config, StreamConfig, StreamSettings, CONFIG};

#[test]
fn toml_sections_override_defaults() {
    let path = std::env::temp_dir().join(format!("yolocam-config-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        r#"
[stream]
name = "Lab Cam"
width = 320
height = 240

[pipeline]
queue_capacity = 8
"#,
    )
    .unwrap();

    let config = Config::load(Some(path.as_path())).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.stream.name, "Lab Cam");
    assert_eq!((config.stream.width, config.stream.height), (320, 240));
    assert_eq!(config.stream.frame_rate, 30);
    assert_eq!(config.pipeline.queue_capacity, 8);
    assert!(config.pipeline.shed_when_queue_full);
    assert_eq!(config.overlay.max_labels, 3);
    assert_eq!(config.clock.ticks_per_second, 10);

    let settings = StreamSettings::from(&config);
    assert_eq!(settings.pipeline.queue_capacity, 8);
}

#[test]
fn global_config_swaps_atomically() {
    let mut config = Config::default();
    assert_eq!(config.stream, StreamConfig::hd720());

    config.stream = StreamConfig::qvga();
    CONFIG.store(Arc::new(config));
    assert_eq!(CONFIG.load().stream.width, 320);
}

#[test]
fn capture_follows_stream_profile() {
    let config = Config {
        stream: StreamConfig::qvga(),
        ..Config::default()
    };
    assert_eq!((config.capture.width, config.capture.height), (1280, 720));

    let capture = config.stream_capture();
    assert_eq!((capture.width, capture.height), (320, 240));
    assert_eq!(capture.fps, 30);
    assert_eq!(capture.format, config.capture.format);
    assert!(capture.device.is_empty());
}
