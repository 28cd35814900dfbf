use super::LabelLogEntry;

const CANDIDATE_THRESHOLDS: [f64; 5] = [0.5, 0.6, 0.7, 0.8, 0.9];
const EMPTY_LOG_THRESHOLD: f64 = 0.5;
const FALLBACK_THRESHOLD: f64 = 0.7;
/// Minimum share of present labels a threshold must keep, as a fraction (4/5).
const MIN_RETAINED_NUM: usize = 4;
const MIN_RETAINED_DEN: usize = 5;

/// Threshold recommendation derived from a label log.
#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdSuggestion {
    pub threshold: f64,
    pub present_labels: usize,
    /// Present labels retained at each candidate threshold, ascending.
    pub retained: Vec<(f64, usize)>,
    pub summary: String,
}

/// Suggests a confidence threshold from the confidences of present labels.
#[derive(Clone, Debug, Default)]
pub struct ConfidenceAnalyzer;

impl ConfidenceAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Pick the strictest candidate threshold that still keeps at least 80%
    /// of the present labels; 0.7 when none does, 0.5 for a log without any
    /// present label.
    pub fn analyze(&self, entries: &[LabelLogEntry]) -> ThresholdSuggestion {
        let confidences: Vec<f64> = entries
            .iter()
            .flat_map(|entry| entry.labels.iter())
            .filter(|(_, label)| label.present)
            .map(|(_, label)| label.confidence)
            .collect();

        if confidences.is_empty() {
            return ThresholdSuggestion {
                threshold: EMPTY_LOG_THRESHOLD,
                present_labels: 0,
                retained: Vec::new(),
                summary: "No present objects found".to_string(),
            };
        }

        let total = confidences.len();
        let retained: Vec<(f64, usize)> = CANDIDATE_THRESHOLDS
            .iter()
            .map(|&threshold| {
                let kept = confidences.iter().filter(|&&c| c >= threshold).count();
                (threshold, kept)
            })
            .collect();

        let threshold = retained
            .iter()
            .filter(|(_, kept)| kept * MIN_RETAINED_DEN >= total * MIN_RETAINED_NUM)
            .map(|(threshold, _)| *threshold)
            .last()
            .unwrap_or(FALLBACK_THRESHOLD);

        let counts = retained
            .iter()
            .map(|(t, kept)| format!(">={:.1}: {}", t, kept))
            .collect::<Vec<_>>()
            .join(", ");
        ThresholdSuggestion {
            threshold,
            present_labels: total,
            summary: format!(
                "Found {} present objects ({}). Suggested threshold: {}",
                total, counts, threshold
            ),
            retained,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AnnotationResult, ClassLabel};

    fn log_with(confidences: &[(bool, f64)]) -> Vec<LabelLogEntry> {
        confidences
            .iter()
            .enumerate()
            .map(|(i, (present, confidence))| {
                let mut labels = AnnotationResult::new();
                labels.insert(
                    "item",
                    ClassLabel {
                        present: *present,
                        confidence: *confidence,
                        bbox: None,
                    },
                );
                LabelLogEntry {
                    image: format!("data/{}.jpg", i),
                    labels,
                }
            })
            .collect()
    }

    #[test]
    fn no_present_labels_suggests_half() {
        let suggestion = ConfidenceAnalyzer::new().analyze(&log_with(&[(false, 0.9), (false, 0.0)]));
        assert_eq!(suggestion.threshold, 0.5);
        assert_eq!(suggestion.present_labels, 0);
        assert!(suggestion.summary.contains("No present objects"));
    }

    #[test]
    fn picks_strictest_threshold_keeping_eighty_percent() {
        // 20 present labels: 17 (85%) at >= 0.6, 12 (60%) at >= 0.7.
        let mut labels = vec![(true, 0.95); 12];
        labels.extend(vec![(true, 0.65); 5]);
        labels.extend(vec![(true, 0.3); 3]);
        labels.push((false, 0.99));

        let suggestion = ConfidenceAnalyzer::new().analyze(&log_with(&labels));
        assert_eq!(suggestion.present_labels, 20);
        assert_eq!(suggestion.threshold, 0.6);
        assert_eq!(suggestion.retained[1], (0.6, 17));
        assert_eq!(suggestion.retained[2], (0.7, 12));
    }

    #[test]
    fn falls_back_when_no_threshold_keeps_enough() {
        let labels = vec![(true, 0.1), (true, 0.2), (true, 0.95)];
        let suggestion = ConfidenceAnalyzer::new().analyze(&log_with(&labels));
        assert_eq!(suggestion.threshold, 0.7);
    }

    #[test]
    fn confident_logs_get_the_top_threshold() {
        let labels = vec![(true, 0.97); 10];
        let suggestion = ConfidenceAnalyzer::new().analyze(&log_with(&labels));
        assert_eq!(suggestion.threshold, 0.9);
    }
}
