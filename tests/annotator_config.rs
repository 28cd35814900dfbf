use std::sync::Mutex;

use tempfile::NamedTempFile;

use frame_annotator::config::{CONFIG_FILE_ENV, ENV_KEYS};
use frame_annotator::{AnnotatorConfig, AnnotatorOptions, ConfigError, FrameAnnotator};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    std::env::remove_var(CONFIG_FILE_ENV);
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

fn prompt_file() -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp prompt");
    std::fs::write(file.path(), "Test prompt for image analysis").expect("write prompt");
    file
}

#[test]
fn resolves_entirely_from_environment() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let prompt = prompt_file();
    let out = tempfile::tempdir().unwrap();

    std::env::set_var("FILTER_CHATGPT_API_KEY", "env-api-key");
    std::env::set_var("FILTER_PROMPT", prompt.path());
    std::env::set_var("FILTER_OUTPUT_SCHEMA", r#"{"item1": {}, "item2": {}}"#);
    std::env::set_var("FILTER_FORWARD_MAIN", "true");
    std::env::set_var("FILTER_NO_OPS", "1");
    std::env::set_var("FILTER_TOPIC_PATTERN", "cam_.*");
    std::env::set_var("FILTER_IMAGE_QUALITY", "70");
    std::env::set_var("FILTER_OUTPUT_DIR", out.path());

    let cfg = AnnotatorConfig::resolve(AnnotatorOptions::default());
    clear_env();
    let cfg = cfg.expect("resolve from env");

    assert_eq!(cfg.api_key, "env-api-key");
    assert!(cfg.routing.forward_main);
    assert!(cfg.no_ops);
    assert_eq!(cfg.preprocess.image_quality, 70);
    assert_eq!(cfg.output_dir, out.path());
    assert_eq!(
        cfg.schema.class_names().collect::<Vec<_>>(),
        vec!["item1", "item2"]
    );
    assert!(cfg.routing.topic_pattern.is_some());
}

#[test]
fn config_file_beats_environment() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let prompt = prompt_file();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = format!(
        r#"{{
            "chatgpt_api_key": "file-key",
            "prompt": "{}",
            "output_schema": {{"avocado": {{"bbox": true}}}},
            "chatgpt_model": "gpt-4o",
            "confidence_threshold": 0.75,
            "exclude_topics": ["debug"]
        }}"#,
        prompt.path().display()
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var(CONFIG_FILE_ENV, file.path());
    std::env::set_var("FILTER_CHATGPT_API_KEY", "env-key");
    std::env::set_var("FILTER_CHATGPT_MODEL", "gpt-4o-mini");
    std::env::set_var("FILTER_MAX_TOKENS", "250");

    let cfg = AnnotatorOptions::from_env_file().and_then(AnnotatorConfig::resolve);
    clear_env();
    let cfg = cfg.expect("resolve config file");

    assert_eq!(cfg.api_key, "file-key");
    assert_eq!(cfg.model, "gpt-4o");
    assert_eq!(cfg.max_tokens, 250);
    assert_eq!(cfg.confidence_threshold, 0.75);
    assert!(cfg.routing.exclude_topics.contains("debug"));
}

#[test]
fn unknown_config_file_keys_are_rejected() {
    let file = NamedTempFile::new().expect("temp config");
    std::fs::write(file.path(), r#"{"api_key": "k", "frobnicate": true}"#).unwrap();
    let err = AnnotatorOptions::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn setup_fails_with_config_error_for_empty_key_and_missing_prompt() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let prompt = prompt_file();

    let err = FrameAnnotator::setup(AnnotatorOptions {
        api_key: Some(String::new()),
        prompt: Some(prompt.path().to_path_buf()),
        output_schema: Some(serde_json::json!({"item1": {}})),
        ..AnnotatorOptions::default()
    })
    .err()
    .expect("empty key must fail");
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::MissingApiKey)
    ));

    let err = FrameAnnotator::setup(AnnotatorOptions {
        api_key: Some("test-api-key".into()),
        prompt: Some("/nonexistent/prompt.txt".into()),
        output_schema: Some(serde_json::json!({"item1": {}})),
        ..AnnotatorOptions::default()
    })
    .err()
    .expect("missing prompt must fail");
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::PromptNotFound(_))
    ));
}

#[test]
fn malformed_topic_pattern_fails_setup() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let prompt = prompt_file();
    std::env::set_var("FILTER_TOPIC_PATTERN", "([a-z");

    let result = AnnotatorConfig::resolve(AnnotatorOptions {
        api_key: Some("test-api-key".into()),
        prompt: Some(prompt.path().to_path_buf()),
        output_schema: Some(serde_json::json!({"item1": {}})),
        ..AnnotatorOptions::default()
    });
    clear_env();
    assert!(matches!(
        result,
        Err(ConfigError::InvalidTopicPattern { .. })
    ));
}
