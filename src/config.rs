//! Annotator configuration.
//!
//! Resolved once at startup with explicit precedence:
//! option value (constructor argument or JSON config file) > `FILTER_*`
//! environment variable > built-in default. Validation failures are
//! `ConfigError`s; nothing is read from the environment after `resolve`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::request::PreprocessConfig;
use crate::router::RoutingConfig;
use crate::schema::OutputSchema;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_TEMPERATURE: f32 = 0.1;
const DEFAULT_MAX_IMAGE_SIZE: u32 = 512;
const DEFAULT_IMAGE_QUALITY: u8 = 85;
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.9;
const DEFAULT_OUTPUT_DIR: &str = "./output_frames";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Environment variable naming an optional JSON config file.
pub const CONFIG_FILE_ENV: &str = "FILTER_CONFIG";

/// Every environment variable consulted by `AnnotatorConfig::resolve`.
pub const ENV_KEYS: [&str; 18] = [
    "FILTER_CHATGPT_API_KEY",
    "FILTER_PROMPT",
    "FILTER_OUTPUT_SCHEMA",
    "FILTER_CHATGPT_MODEL",
    "FILTER_MAX_TOKENS",
    "FILTER_TEMPERATURE",
    "FILTER_MAX_IMAGE_SIZE",
    "FILTER_IMAGE_QUALITY",
    "FILTER_PRESERVE_ORIGINAL_FORMAT",
    "FILTER_CONFIDENCE_THRESHOLD",
    "FILTER_SAVE_FRAMES",
    "FILTER_OUTPUT_DIR",
    "FILTER_NO_OPS",
    "FILTER_FORWARD_MAIN",
    "FILTER_TOPIC_PATTERN",
    "FILTER_EXCLUDE_TOPICS",
    "FILTER_TIMEOUT_SECS",
    "FILTER_API_URL",
];

/// Unresolved options. `None` means "not given here".
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnotatorOptions {
    #[serde(alias = "chatgpt_api_key")]
    pub api_key: Option<String>,
    pub prompt: Option<PathBuf>,
    pub output_schema: Option<Value>,
    #[serde(alias = "chatgpt_model")]
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub max_image_size: Option<u32>,
    pub image_quality: Option<u8>,
    pub preserve_original_format: Option<bool>,
    pub confidence_threshold: Option<f64>,
    pub save_frames: Option<bool>,
    pub output_dir: Option<PathBuf>,
    pub no_ops: Option<bool>,
    pub forward_main: Option<bool>,
    pub topic_pattern: Option<String>,
    pub exclude_topics: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
    pub api_url: Option<String>,
}

impl AnnotatorOptions {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
            key: "config file",
            value: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Options from the file named by `FILTER_CONFIG`, or empty options.
    pub fn from_env_file() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim())),
            _ => Ok(Self::default()),
        }
    }
}

/// Fully resolved, validated configuration. Immutable for the run.
#[derive(Clone, Debug)]
pub struct AnnotatorConfig {
    pub api_key: String,
    pub prompt_path: PathBuf,
    pub prompt: String,
    pub schema: OutputSchema,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub preprocess: PreprocessConfig,
    pub confidence_threshold: f64,
    pub save_frames: bool,
    pub output_dir: PathBuf,
    pub no_ops: bool,
    pub routing: RoutingConfig,
    pub timeout: Duration,
    pub api_url: String,
}

impl AnnotatorConfig {
    /// Resolve against the process environment.
    pub fn resolve(options: AnnotatorOptions) -> Result<Self, ConfigError> {
        Self::resolve_with(options, |key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary environment lookup.
    pub fn resolve_with<E>(options: AnnotatorOptions, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let env = EnvLookup(env);

        let api_key = options
            .api_key
            .or_else(|| env.string("FILTER_CHATGPT_API_KEY"))
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let prompt_path = options
            .prompt
            .or_else(|| env.string("FILTER_PROMPT").map(PathBuf::from))
            .ok_or(ConfigError::MissingOption("prompt"))?;
        if !prompt_path.is_file() {
            return Err(ConfigError::PromptNotFound(prompt_path));
        }
        let prompt = std::fs::read_to_string(&prompt_path).map_err(|source| ConfigError::Io {
            path: prompt_path.clone(),
            source,
        })?;

        let schema_value = match options.output_schema {
            Some(value) => value,
            None => match env.string("FILTER_OUTPUT_SCHEMA") {
                Some(text) => serde_json::from_str(&text).map_err(|e| ConfigError::InvalidValue {
                    key: "FILTER_OUTPUT_SCHEMA",
                    value: text.clone(),
                    reason: e.to_string(),
                })?,
                None => return Err(ConfigError::MissingOption("output_schema")),
            },
        };
        let schema = OutputSchema::from_value(&schema_value)?;

        let model = options
            .model
            .or_else(|| env.string("FILTER_CHATGPT_MODEL"))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let max_tokens = pick(
            options.max_tokens,
            || env.parse("FILTER_MAX_TOKENS"),
            DEFAULT_MAX_TOKENS,
        )?;
        let temperature = pick(
            options.temperature,
            || env.parse("FILTER_TEMPERATURE"),
            DEFAULT_TEMPERATURE,
        )?;
        let preprocess = PreprocessConfig {
            max_image_size: pick(
                options.max_image_size,
                || env.parse("FILTER_MAX_IMAGE_SIZE"),
                DEFAULT_MAX_IMAGE_SIZE,
            )?,
            image_quality: pick(
                options.image_quality,
                || env.parse("FILTER_IMAGE_QUALITY"),
                DEFAULT_IMAGE_QUALITY,
            )?,
            preserve_original_format: pick(
                options.preserve_original_format,
                || env.flag("FILTER_PRESERVE_ORIGINAL_FORMAT"),
                false,
            )?,
        };
        let confidence_threshold = pick(
            options.confidence_threshold,
            || env.parse("FILTER_CONFIDENCE_THRESHOLD"),
            DEFAULT_CONFIDENCE_THRESHOLD,
        )?;
        let save_frames = pick(options.save_frames, || env.flag("FILTER_SAVE_FRAMES"), true)?;
        let output_dir = options
            .output_dir
            .or_else(|| env.string("FILTER_OUTPUT_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        let no_ops = pick(options.no_ops, || env.flag("FILTER_NO_OPS"), false)?;
        let forward_main = pick(
            options.forward_main,
            || env.flag("FILTER_FORWARD_MAIN"),
            false,
        )?;
        let topic_pattern = options
            .topic_pattern
            .or_else(|| env.string("FILTER_TOPIC_PATTERN"));
        let exclude_topics = options
            .exclude_topics
            .or_else(|| env.string("FILTER_EXCLUDE_TOPICS").map(|v| split_csv(&v)))
            .unwrap_or_default();
        let routing = RoutingConfig::new(topic_pattern.as_deref(), exclude_topics, forward_main)?;
        let timeout = Duration::from_secs(pick(
            options.timeout_secs,
            || env.parse("FILTER_TIMEOUT_SECS"),
            DEFAULT_TIMEOUT_SECS,
        )?);
        let api_url = options
            .api_url
            .or_else(|| env.string("FILTER_API_URL"))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let cfg = Self {
            api_key,
            prompt_path,
            prompt,
            schema,
            model,
            max_tokens,
            temperature,
            preprocess,
            confidence_threshold,
            save_frames,
            output_dir,
            no_ops,
            routing,
            timeout,
            api_url,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.preprocess.image_quality > 100 {
            return Err(out_of_range(
                "image_quality",
                self.preprocess.image_quality,
                "must be within 0-100",
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(out_of_range("temperature", self.temperature, "must be within 0-2"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(out_of_range(
                "confidence_threshold",
                self.confidence_threshold,
                "must be within 0-1",
            ));
        }
        if self.max_tokens == 0 {
            return Err(out_of_range("max_tokens", self.max_tokens, "must be positive"));
        }
        if self.timeout.is_zero() {
            return Err(out_of_range("timeout_secs", 0, "must be positive"));
        }
        if self.model.trim().is_empty() {
            return Err(out_of_range("model", "", "must be non-empty"));
        }
        Ok(())
    }

    pub fn label_log_path(&self) -> PathBuf {
        self.output_dir.join(crate::dataset::LABEL_LOG_FILE)
    }
}

fn pick<T, F>(option: Option<T>, env: F, default: T) -> Result<T, ConfigError>
where
    F: FnOnce() -> Result<Option<T>, ConfigError>,
{
    match option {
        Some(value) => Ok(value),
        None => Ok(env()?.unwrap_or(default)),
    }
}

fn out_of_range(key: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

struct EnvLookup<E>(E);

impl<E: Fn(&str) -> Option<String>> EnvLookup<E> {
    /// Non-blank value of `key`.
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key,
                    value,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn flag(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        match self.string(key) {
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Some(true)),
                "false" | "0" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::InvalidValue {
                    key,
                    value,
                    reason: "expected a boolean".to_string(),
                }),
            },
            None => Ok(None),
        }
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

/// Exclude set as configured, for logging.
pub fn describe_excludes(topics: &BTreeSet<String>) -> String {
    if topics.is_empty() {
        "-".to_string()
    } else {
        topics.iter().cloned().collect::<Vec<_>>().join(",")
    }
}
