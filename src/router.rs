//! Per-tick topic routing.
//!
//! Order of operations:
//! 1. Every topic present this tick is a candidate.
//! 2. `topic_pattern` keeps only topics matching from their first character, the rest are dropped.
//! 3. `exclude_topics` removes named topics, also dropped.
//! 4. With `forward_main`, the `main` topic is passed through untouched; every
//!    other survivor is routed for annotation.
//! 5. `main` is emitted first, other survivors keep their relative order.

use std::collections::BTreeSet;

use regex::Regex;

use crate::error::ConfigError;
use crate::frame::{FrameBatch, FrameRecord, MAIN_TOPIC};

#[derive(Clone, Debug, Default)]
pub struct RoutingConfig {
    pub topic_pattern: Option<Regex>,
    pub exclude_topics: BTreeSet<String>,
    pub forward_main: bool,
}

impl RoutingConfig {
    /// Compile a routing config. A malformed pattern is a setup error.
    pub fn new(
        topic_pattern: Option<&str>,
        exclude_topics: impl IntoIterator<Item = String>,
        forward_main: bool,
    ) -> Result<Self, ConfigError> {
        let topic_pattern = match topic_pattern.map(str::trim).filter(|p| !p.is_empty()) {
            Some(pattern) => Some(compile_anchored(pattern)?),
            None => None,
        };
        Ok(Self {
            topic_pattern,
            exclude_topics: exclude_topics
                .into_iter()
                .map(|topic| topic.trim().to_string())
                .filter(|topic| !topic.is_empty())
                .collect(),
            forward_main,
        })
    }
}

/// Anchors the pattern at the start so `test_.*` matches `test_frame` but not `my_test_frame`.
fn compile_anchored(pattern: &str) -> Result<Regex, ConfigError> {
    let invalid = |source| ConfigError::InvalidTopicPattern {
        pattern: pattern.to_string(),
        source,
    };
    Regex::new(pattern).map_err(invalid)?;
    Regex::new(&format!("^(?:{})", pattern)).map_err(invalid)
}

/// Routing decision for a surviving topic.
#[derive(Debug)]
pub enum Route {
    /// Forward unmodified: no model call, no log entry.
    PassThrough(FrameRecord),
    /// Send through the annotation path.
    Annotate(FrameRecord),
}

pub struct FrameRouter {
    config: RoutingConfig,
}

impl FrameRouter {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    fn retains(&self, topic: &str) -> bool {
        if let Some(pattern) = &self.config.topic_pattern {
            if !pattern.is_match(topic) {
                return false;
            }
        }
        !self.config.exclude_topics.contains(topic)
    }

    /// Route one tick's batch. Dropped topics do not appear in the output.
    pub fn route(&self, batch: FrameBatch) -> Vec<(String, Route)> {
        let mut main = None;
        let mut rest = Vec::with_capacity(batch.len());

        for (topic, frame) in batch {
            if !self.retains(&topic) {
                log::debug!("dropping topic '{}'", topic);
                continue;
            }
            let is_main = topic == MAIN_TOPIC;
            let route = if is_main && self.config.forward_main {
                Route::PassThrough(frame)
            } else {
                Route::Annotate(frame)
            };
            if is_main {
                main = Some((topic, route));
            } else {
                rest.push((topic, route));
            }
        }

        main.into_iter().chain(rest).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameImage;
    use image::{DynamicImage, RgbImage};

    fn frame(id: &str) -> FrameRecord {
        FrameRecord::with_id(
            FrameImage::from_pixels(DynamicImage::ImageRgb8(RgbImage::new(4, 4))),
            id,
        )
    }

    fn batch(topics: &[&str]) -> FrameBatch {
        topics
            .iter()
            .map(|topic| (topic.to_string(), frame(topic)))
            .collect()
    }

    fn summary(routes: &[(String, Route)]) -> Vec<(&str, bool)> {
        routes
            .iter()
            .map(|(topic, route)| (topic.as_str(), matches!(route, Route::Annotate(_))))
            .collect()
    }

    #[test]
    fn forward_main_passes_main_first() {
        let router = FrameRouter::new(RoutingConfig::new(None, Vec::new(), true).unwrap());
        let routes = router.route(batch(&["other_topic", "main"]));
        assert_eq!(summary(&routes), vec![("main", false), ("other_topic", true)]);
    }

    #[test]
    fn main_is_annotated_without_forward_main() {
        let router = FrameRouter::new(RoutingConfig::new(None, Vec::new(), false).unwrap());
        let routes = router.route(batch(&["a", "main", "b"]));
        assert_eq!(summary(&routes), vec![("main", true), ("a", true), ("b", true)]);
    }

    #[test]
    fn pattern_drops_non_matching_topics() {
        let router =
            FrameRouter::new(RoutingConfig::new(Some("test_.*"), Vec::new(), false).unwrap());
        let routes = router.route(batch(&["test_frame", "other_frame", "my_test_frame"]));
        assert_eq!(summary(&routes), vec![("test_frame", true)]);
    }

    #[test]
    fn exclude_applies_after_pattern() {
        let router = FrameRouter::new(
            RoutingConfig::new(
                Some("test_.*"),
                vec!["test_skip".to_string(), "main".to_string()],
                true,
            )
            .unwrap(),
        );
        let routes = router.route(batch(&["main", "test_keep", "test_skip"]));
        assert_eq!(summary(&routes), vec![("test_keep", true)]);
    }

    #[test]
    fn malformed_pattern_is_config_error() {
        let err = RoutingConfig::new(Some("test_(["), Vec::new(), false).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTopicPattern { .. }));
    }
}
