//! Order-preserving summary fan-out with bounded concurrency.
//!
//! Text units and table units are summarized in separate batches; tables are fed their
//! structured HTML serialization, not flattened text. The fan-out runs at most
//! `concurrency` calls at once and yields exactly one outcome per input unit, in input
//! order — the 1:1 alignment is what lets the indexing step zip summaries back onto
//! their units without guesswork.

use crate::summarization::{SummarizationClient, table_summary_prompt, text_summary_prompt};
use futures_util::StreamExt;
use futures_util::stream;
use std::sync::Arc;

/// Character budget for the raw-content fallback indexed when a summary call fails.
const FALLBACK_EXCERPT_CHARS: usize = 512;

/// Content kinds the summary pipeline distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    /// Narrative text chunk.
    Text,
    /// Table in HTML serialization.
    Table,
}

/// Outcome of summarizing a single unit.
#[derive(Debug, Clone)]
pub enum SummaryOutcome {
    /// The provider produced a summary.
    Summarized(String),
    /// The provider failed; the unit is indexed under a raw-content excerpt instead.
    Degraded {
        /// Excerpt of the raw unit used as the index text.
        fallback: String,
        /// Captured provider error.
        error: String,
    },
}

impl SummaryOutcome {
    /// The text this unit should be indexed under.
    pub fn index_text(&self) -> &str {
        match self {
            Self::Summarized(summary) => summary,
            Self::Degraded { fallback, .. } => fallback,
        }
    }

    /// Whether the summary call failed for this unit.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Bounded-concurrency summarization over unit batches.
pub struct SummaryPipeline {
    client: Arc<dyn SummarizationClient>,
    concurrency: usize,
}

impl SummaryPipeline {
    /// Construct a pipeline with the given fan-out bound (clamped to at least 1).
    pub fn new(client: Arc<dyn SummarizationClient>, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    /// Construct a pipeline from the process configuration.
    pub fn from_config(client: Arc<dyn SummarizationClient>) -> Self {
        Self::new(client, crate::config::get_config().summary_concurrency)
    }

    /// Summarize a batch of same-kind units, preserving input order 1:1.
    pub async fn summarize_batch(&self, units: &[String], kind: SummaryKind) -> Vec<SummaryOutcome> {
        if units.is_empty() {
            return Vec::new();
        }

        let calls = units.iter().enumerate().map(|(position, unit)| {
            let client = Arc::clone(&self.client);
            let prompt = match kind {
                SummaryKind::Text => text_summary_prompt(unit),
                SummaryKind::Table => table_summary_prompt(unit),
            };
            let unit = unit.clone();
            async move {
                match client.summarize(&prompt).await {
                    Ok(summary) => SummaryOutcome::Summarized(summary),
                    Err(error) => {
                        tracing::warn!(
                            position,
                            kind = ?kind,
                            error = %error,
                            "Summarization failed; indexing raw excerpt"
                        );
                        SummaryOutcome::Degraded {
                            fallback: fallback_excerpt(&unit),
                            error: error.to_string(),
                        }
                    }
                }
            }
        });

        let outcomes: Vec<SummaryOutcome> = stream::iter(calls)
            .buffered(self.concurrency)
            .collect()
            .await;

        tracing::debug!(
            kind = ?kind,
            units = units.len(),
            degraded = outcomes.iter().filter(|outcome| outcome.is_degraded()).count(),
            "Summaries created"
        );
        outcomes
    }
}

fn fallback_excerpt(unit: &str) -> String {
    if unit.chars().count() <= FALLBACK_EXCERPT_CHARS {
        unit.to_string()
    } else {
        unit.chars().take(FALLBACK_EXCERPT_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarization::SummarizationError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct EchoSummarizer {
        fail_marker: Option<String>,
    }

    #[async_trait]
    impl SummarizationClient for EchoSummarizer {
        async fn summarize(&self, prompt: &str) -> Result<String, SummarizationError> {
            if let Some(marker) = &self.fail_marker
                && prompt.contains(marker)
            {
                return Err(SummarizationError::GenerationFailed("simulated".into()));
            }
            Ok(format!("summary of [{prompt}]"))
        }
    }

    struct GaugedSummarizer {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SummarizationClient for GaugedSummarizer {
        async fn summarize(&self, _prompt: &str) -> Result<String, SummarizationError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok("summary".into())
        }
    }

    #[tokio::test]
    async fn outcomes_preserve_input_order() {
        let pipeline = SummaryPipeline::new(Arc::new(EchoSummarizer { fail_marker: None }), 3);
        let units = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];

        let outcomes = pipeline.summarize_batch(&units, SummaryKind::Text).await;

        assert_eq!(outcomes.len(), 3);
        for (unit, outcome) in units.iter().zip(&outcomes) {
            assert!(outcome.index_text().contains(unit.as_str()));
        }
    }

    #[tokio::test]
    async fn one_failure_degrades_only_its_own_unit() {
        let pipeline = SummaryPipeline::new(
            Arc::new(EchoSummarizer {
                fail_marker: Some("beta".into()),
            }),
            3,
        );
        let units = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];

        let outcomes = pipeline.summarize_batch(&units, SummaryKind::Text).await;

        assert!(!outcomes[0].is_degraded());
        assert!(outcomes[1].is_degraded());
        assert!(!outcomes[2].is_degraded());
        assert_eq!(outcomes[1].index_text(), "beta");
    }

    #[tokio::test]
    async fn fan_out_respects_the_concurrency_bound() {
        let gauge = Arc::new(GaugedSummarizer {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pipeline = SummaryPipeline::new(gauge.clone(), 3);
        let units: Vec<String> = (0..10).map(|n| format!("unit {n}")).collect();

        let outcomes = pipeline.summarize_batch(&units, SummaryKind::Table).await;

        assert_eq!(outcomes.len(), 10);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let pipeline = SummaryPipeline::new(Arc::new(EchoSummarizer { fail_marker: None }), 3);
        let outcomes = pipeline.summarize_batch(&[], SummaryKind::Table).await;
        assert!(outcomes.is_empty());
    }

    #[test]
    fn fallback_excerpt_respects_char_boundaries() {
        let long: String = "é".repeat(FALLBACK_EXCERPT_CHARS + 10);
        let excerpt = fallback_excerpt(&long);
        assert_eq!(excerpt.chars().count(), FALLBACK_EXCERPT_CHARS);
    }
}
