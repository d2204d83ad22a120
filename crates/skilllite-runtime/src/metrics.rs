//! Hierarchical metrics: Session owns Prompts, each Prompt owns API-call and
//! tool-call trackers. Timers guarantee `end` is recorded on all exit paths
//! by recording it in `Drop`, not by requiring callers to remember.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct ApiCallRecord {
    pub model: String,
    pub duration_ms: u64,
    pub success: bool,
    pub finish_reason: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub id: String,
    pub arguments: String,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// A scoped timer for one API call. Records into the parent prompt's list
/// when finished, or on drop if `finish` was never called (the "guarantee
/// end is recorded on all exit paths" pattern from §9's design notes).
pub struct ApiCallTracker<'a> {
    start: Instant,
    model: String,
    finished: bool,
    parent: &'a PromptMetrics,
}

impl<'a> ApiCallTracker<'a> {
    pub fn finish(
        mut self,
        success: bool,
        finish_reason: Option<String>,
        prompt_tokens: u64,
        completion_tokens: u64,
        cache_creation_tokens: u64,
        cache_read_tokens: u64,
        error: Option<String>,
    ) {
        self.finished = true;
        let record = ApiCallRecord {
            model: self.model.clone(),
            duration_ms: self.start.elapsed().as_millis() as u64,
            success,
            finish_reason,
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cache_creation_tokens,
            cache_read_tokens,
            error,
        };
        self.parent.api_calls.lock().unwrap().push(record);
    }
}

impl<'a> Drop for ApiCallTracker<'a> {
    fn drop(&mut self) {
        if !self.finished {
            let record = ApiCallRecord {
                model: self.model.clone(),
                duration_ms: self.start.elapsed().as_millis() as u64,
                success: false,
                finish_reason: None,
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
                cache_creation_tokens: 0,
                cache_read_tokens: 0,
                error: Some("tracker dropped without finish()".to_string()),
            };
            self.parent.api_calls.lock().unwrap().push(record);
        }
    }
}

#[derive(Debug, Default)]
pub struct PromptMetrics {
    pub api_calls: std::sync::Mutex<Vec<ApiCallRecord>>,
    pub tool_calls: std::sync::Mutex<Vec<ToolCallRecord>>,
}

impl PromptMetrics {
    pub fn start_api_call(&self, model: impl Into<String>) -> ApiCallTracker<'_> {
        ApiCallTracker {
            start: Instant::now(),
            model: model.into(),
            finished: false,
            parent: self,
        }
    }

    pub fn record_tool_call(
        &self,
        name: impl Into<String>,
        id: impl Into<String>,
        arguments: impl Into<String>,
        duration_ms: u64,
        success: bool,
        error: Option<String>,
    ) {
        self.tool_calls.lock().unwrap().push(ToolCallRecord {
            name: name.into(),
            id: id.into(),
            arguments: arguments.into(),
            duration_ms,
            success,
            error,
        });
    }
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    pub prompts: std::sync::Mutex<Vec<std::sync::Arc<PromptMetrics>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_prompt(&self) -> std::sync::Arc<PromptMetrics> {
        let prompt = std::sync::Arc::new(PromptMetrics::default());
        self.prompts.lock().unwrap().push(prompt.clone());
        prompt
    }

    pub fn summary(&self, pricing: &PricingTable) -> SessionSummary {
        let prompts = self.prompts.lock().unwrap();
        let mut api_count = 0usize;
        let mut api_success = 0usize;
        let mut tool_count = 0usize;
        let mut tool_success = 0usize;
        let mut prompt_tokens = 0u64;
        let mut completion_tokens = 0u64;
        let mut cache_creation = 0u64;
        let mut cache_read = 0u64;
        let mut per_tool: HashMap<String, ToolBreakdown> = HashMap::new();
        let mut model_seen = String::new();

        for prompt in prompts.iter() {
            for call in prompt.api_calls.lock().unwrap().iter() {
                api_count += 1;
                if call.success {
                    api_success += 1;
                }
                prompt_tokens += call.prompt_tokens;
                completion_tokens += call.completion_tokens;
                cache_creation += call.cache_creation_tokens;
                cache_read += call.cache_read_tokens;
                model_seen = call.model.clone();
            }
            for call in prompt.tool_calls.lock().unwrap().iter() {
                tool_count += 1;
                if call.success {
                    tool_success += 1;
                }
                let entry = per_tool.entry(call.name.clone()).or_default();
                entry.count += 1;
                if call.success {
                    entry.success += 1;
                } else {
                    entry.failed += 1;
                }
            }
        }

        let cost = pricing.get(&model_seen).map(|rates| {
            let input_cost = prompt_tokens as f64 / 1_000_000.0 * rates.input_per_million;
            let output_cost = completion_tokens as f64 / 1_000_000.0 * rates.output_per_million;
            let cache_write_cost =
                cache_creation as f64 / 1_000_000.0 * rates.cache_write_5m_per_million;
            let cache_read_cost = cache_read as f64 / 1_000_000.0 * rates.cache_read_per_million;
            let without_cache = input_cost + output_cost + cache_write_cost + cache_read_cost;
            let with_cache = output_cost + cache_write_cost + cache_read_cost;
            let savings = (without_cache - with_cache).max(0.0);
            CostRollup {
                model_found: true,
                with_cache: Some(with_cache),
                without_cache: Some(without_cache),
                savings: Some(savings),
            }
        });

        SessionSummary {
            prompt_count: prompts.len(),
            api_call_count: api_count,
            api_success_count: api_success,
            tool_call_count: tool_count,
            tool_success_count: tool_success,
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cache_creation_tokens: cache_creation,
            cache_read_tokens: cache_read,
            per_tool_breakdown: per_tool,
            cost: cost.unwrap_or(CostRollup {
                model_found: false,
                with_cache: None,
                without_cache: None,
                savings: None,
            }),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ToolBreakdown {
    pub count: usize,
    pub success: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostRollup {
    pub model_found: bool,
    pub with_cache: Option<f64>,
    pub without_cache: Option<f64>,
    pub savings: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub prompt_count: usize,
    pub api_call_count: usize,
    pub api_success_count: usize,
    pub tool_call_count: usize,
    pub tool_success_count: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub per_tool_breakdown: HashMap<String, ToolBreakdown>,
    pub cost: CostRollup,
}

/// model → {input, output, cache-write-5m, cache-read} per-million-token
/// pricing. The concrete pricing tables are out of scope (§1); this is the
/// lookup contract the cost rollup needs from whoever supplies them.
#[derive(Debug, Clone, Copy)]
pub struct ModelRates {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_write_5m_per_million: f64,
    pub cache_read_per_million: f64,
}

#[derive(Debug, Default)]
pub struct PricingTable {
    rates: HashMap<String, ModelRates>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: impl Into<String>, rates: ModelRates) {
        self.rates.insert(model.into(), rates);
    }

    pub fn get(&self, model: &str) -> Option<&ModelRates> {
        self.rates.get(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_yields_null_costs() {
        let collector = MetricsCollector::new();
        let prompt = collector.open_prompt();
        prompt
            .start_api_call("mystery-model")
            .finish(true, Some("stop".into()), 100, 50, 0, 0, None);
        let summary = collector.summary(&PricingTable::new());
        assert!(!summary.cost.model_found);
        assert!(summary.cost.with_cache.is_none());
    }

    #[test]
    fn known_model_computes_savings() {
        let collector = MetricsCollector::new();
        let prompt = collector.open_prompt();
        prompt
            .start_api_call("claude-x")
            .finish(true, Some("stop".into()), 1_000_000, 0, 0, 1_000_000, None);
        let mut pricing = PricingTable::new();
        pricing.insert(
            "claude-x",
            ModelRates {
                input_per_million: 3.0,
                output_per_million: 15.0,
                cache_write_5m_per_million: 3.75,
                cache_read_per_million: 0.3,
            },
        );
        let summary = collector.summary(&pricing);
        assert!(summary.cost.model_found);
        assert!(summary.cost.savings.unwrap() > 0.0);
    }

    #[test]
    fn tool_breakdown_tracks_success_and_failure() {
        let collector = MetricsCollector::new();
        let prompt = collector.open_prompt();
        prompt.record_tool_call("read_file", "tc_1", "{}", 5, true, None);
        prompt.record_tool_call("read_file", "tc_2", "{}", 5, false, Some("boom".into()));
        let summary = collector.summary(&PricingTable::new());
        let entry = &summary.per_tool_breakdown["read_file"];
        assert_eq!(entry.count, 2);
        assert_eq!(entry.success, 1);
        assert_eq!(entry.failed, 1);
    }
}
