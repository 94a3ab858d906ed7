use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use castellan_types::{EventType, LlmSecurityEventResponse, LogEvent, RiskLevel};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::LlmError;
use crate::LlmClient;

/// How `confidence` is reduced across successful ensemble members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceReducer {
    /// Arithmetic mean.
    Mean,
    /// Median.
    Median,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Mean weighted by each member's configured weight.
    WeightedMean,
}

/// How the `risk` field is aggregated across successful ensemble members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskVoteMode {
    /// Plain majority; ties broken by first insertion order.
    Majority,
    /// Like `Majority`, but records a unanimous-vote statistic when every
    /// member agrees.
    Unanimous,
    /// Votes are weighted by each member's configured weight.
    Weighted,
}

/// Controls how per-member responses are combined into one.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Risk-level voting mode.
    pub risk_mode: RiskVoteMode,
    /// Confidence reduction strategy.
    pub confidence_reducer: ConfidenceReducer,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            risk_mode: RiskVoteMode::Majority,
            confidence_reducer: ConfidenceReducer::Mean,
        }
    }
}

/// Controls how the ensemble dispatches to its members.
#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    /// Run members concurrently under `shared_deadline` rather than
    /// sequentially.
    pub parallel: bool,
    /// Deadline shared across all members when `parallel` is true.
    pub shared_deadline: Duration,
    /// Minimum number of members that must succeed for a voted result to
    /// be used; below this the ensemble falls through to the default
    /// single-model client.
    pub min_successful_models: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            shared_deadline: Duration::from_secs(45),
            min_successful_models: 2,
        }
    }
}

/// One model in the ensemble: its display name, its fully composed client
/// chain, and its vote/confidence weight.
pub struct EnsembleMember {
    /// Model name, used for telemetry and as the MITRE/action union key
    /// ordering.
    pub model_name: String,
    /// The composed client chain for this model.
    pub client: Box<dyn LlmClient>,
    /// Vote/confidence weight; normalized to sum to 1.0 across members at
    /// construction time.
    pub weight: f64,
}

/// Running counters exposed by [`EnsembleClient`].
#[derive(Debug, Default)]
pub struct EnsembleStats {
    unanimous_votes: AtomicU64,
    partial_fallbacks: AtomicU64,
}

impl EnsembleStats {
    /// Number of `analyze` calls where every successful member agreed on
    /// `risk` (only meaningful under [`RiskVoteMode::Unanimous`]).
    pub fn unanimous_votes(&self) -> u64 {
        self.unanimous_votes.load(Ordering::Relaxed)
    }
    /// Number of calls that fell below `min_successful_models` and used
    /// the highest-confidence partial result or the default client.
    pub fn partial_fallbacks(&self) -> u64 {
        self.partial_fallbacks.load(Ordering::Relaxed)
    }
}

/// Runs the decorated chain against `members` (at least 2), aggregates
/// their responses into one, and falls through to `default` for `generate`
/// (never voted) and for `analyze` when too few members succeed.
pub struct EnsembleClient {
    members: Vec<EnsembleMember>,
    default: Box<dyn LlmClient>,
    config: EnsembleConfig,
    aggregation: AggregationConfig,
    stats: EnsembleStats,
}

impl EnsembleClient {
    /// Construct an ensemble over `members` (weights normalized to sum to
    /// 1.0), falling through to `default` below `min_successful_models`.
    pub fn new(
        mut members: Vec<EnsembleMember>,
        default: Box<dyn LlmClient>,
        config: EnsembleConfig,
        aggregation: AggregationConfig,
    ) -> Self {
        let total_weight: f64 = members.iter().map(|m| m.weight).sum();
        if total_weight > 0.0 {
            for m in &mut members {
                m.weight /= total_weight;
            }
        }
        Self {
            members,
            default,
            config,
            aggregation,
            stats: EnsembleStats::default(),
        }
    }

    /// Expose running counters.
    pub fn stats(&self) -> &EnsembleStats {
        &self.stats
    }

    async fn collect_responses(
        &self,
        event: &LogEvent,
        neighbours: &[LogEvent],
        cancel: CancellationToken,
    ) -> Vec<(usize, LlmSecurityEventResponse)> {
        let run_one = |idx: usize, member: &EnsembleMember| {
            let cancel = cancel.clone();
            async move {
                let raw = member.client.analyze(event, neighbours, cancel).await.unwrap_or_default();
                serde_json::from_str::<LlmSecurityEventResponse>(&raw)
                    .ok()
                    .map(|r| (idx, r))
            }
        };

        let results = if self.config.parallel {
            let futures = self.members.iter().enumerate().map(|(i, m)| run_one(i, m));
            match tokio::time::timeout(self.config.shared_deadline, join_all(futures)).await {
                Ok(results) => results,
                Err(_) => {
                    warn!("ensemble shared deadline exceeded");
                    Vec::new()
                }
            }
        } else {
            let mut results = Vec::with_capacity(self.members.len());
            for (i, member) in self.members.iter().enumerate() {
                results.push(run_one(i, member).await);
            }
            results
        };

        results.into_iter().flatten().collect()
    }

    fn aggregate(&self, responses: &[(usize, LlmSecurityEventResponse)]) -> LlmSecurityEventResponse {
        let risk = self.vote_risk(responses);
        let confidence = self.reduce_confidence(responses);
        let event_type = majority_event_type(responses);
        let summary = responses
            .iter()
            .max_by_key(|(_, r)| r.confidence)
            .map(|(_, r)| r.summary.clone())
            .unwrap_or_default();

        let mut mitre: BTreeSet<String> = BTreeSet::new();
        let mut actions = Vec::new();
        let mut seen_actions = std::collections::HashSet::new();
        for (_, r) in responses {
            mitre.extend(r.mitre.iter().cloned());
            for action in &r.recommended_actions {
                if seen_actions.insert(action.clone()) {
                    actions.push(action.clone());
                }
            }
        }

        LlmSecurityEventResponse {
            risk,
            confidence,
            summary,
            mitre: mitre.into_iter().collect(),
            recommended_actions: actions,
            event_type,
        }
    }

    fn vote_risk(&self, responses: &[(usize, LlmSecurityEventResponse)]) -> RiskLevel {
        match self.aggregation.risk_mode {
            RiskVoteMode::Weighted => {
                let mut scores = [0.0f64; 4];
                for (idx, r) in responses {
                    let weight = self.members.get(*idx).map(|m| m.weight).unwrap_or(0.0);
                    scores[risk_index(r.risk)] += weight;
                }
                index_to_risk(argmax_first(&scores))
            }
            RiskVoteMode::Majority | RiskVoteMode::Unanimous => {
                let mut counts = [0u32; 4];
                let mut first_seen = [usize::MAX; 4];
                for (order, (_, r)) in responses.iter().enumerate() {
                    let idx = risk_index(r.risk);
                    counts[idx] += 1;
                    if first_seen[idx] == usize::MAX {
                        first_seen[idx] = order;
                    }
                }
                if self.aggregation.risk_mode == RiskVoteMode::Unanimous
                    && responses.iter().all(|(_, r)| r.risk == responses[0].1.risk)
                    && !responses.is_empty()
                {
                    self.stats.unanimous_votes.fetch_add(1, Ordering::Relaxed);
                }
                let best = counts
                    .iter()
                    .enumerate()
                    .max_by(|(a_idx, a_count), (b_idx, b_count)| {
                        a_count
                            .cmp(b_count)
                            .then_with(|| first_seen[*b_idx].cmp(&first_seen[*a_idx]))
                    })
                    .map(|(idx, _)| idx)
                    .unwrap_or(0);
                index_to_risk(best)
            }
        }
    }

    fn reduce_confidence(&self, responses: &[(usize, LlmSecurityEventResponse)]) -> u8 {
        if responses.is_empty() {
            return 0;
        }
        let values: Vec<f64> = responses.iter().map(|(_, r)| r.confidence as f64).collect();
        let reduced = match self.aggregation.confidence_reducer {
            ConfidenceReducer::Mean => values.iter().sum::<f64>() / values.len() as f64,
            ConfidenceReducer::Median => {
                let mut sorted = values.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            ConfidenceReducer::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            ConfidenceReducer::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            ConfidenceReducer::WeightedMean => {
                let mut weighted_sum = 0.0;
                let mut weight_total = 0.0;
                for (idx, r) in responses {
                    let weight = self.members.get(*idx).map(|m| m.weight).unwrap_or(0.0);
                    weighted_sum += weight * r.confidence as f64;
                    weight_total += weight;
                }
                if weight_total > 0.0 {
                    weighted_sum / weight_total
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            }
        };
        reduced.round().clamp(0.0, 100.0) as u8
    }
}

fn risk_index(risk: RiskLevel) -> usize {
    match risk {
        RiskLevel::Low => 0,
        RiskLevel::Medium => 1,
        RiskLevel::High => 2,
        RiskLevel::Critical => 3,
    }
}

fn index_to_risk(idx: usize) -> RiskLevel {
    match idx {
        0 => RiskLevel::Low,
        1 => RiskLevel::Medium,
        2 => RiskLevel::High,
        _ => RiskLevel::Critical,
    }
}

fn argmax_first(scores: &[f64; 4]) -> usize {
    let mut best = 0;
    for i in 1..scores.len() {
        if scores[i] > scores[best] {
            best = i;
        }
    }
    best
}

fn majority_event_type(responses: &[(usize, LlmSecurityEventResponse)]) -> EventType {
    use std::collections::HashMap;
    let mut counts: HashMap<&'static str, (u32, usize)> = HashMap::new();
    for (order, (_, r)) in responses.iter().enumerate() {
        let key = event_type_key(r.event_type);
        let entry = counts.entry(key).or_insert((0, order));
        entry.0 += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then_with(|| b.1 .1.cmp(&a.1 .1)))
        .map(|(key, _)| event_type_from_key(key))
        .unwrap_or(EventType::Unknown)
}

fn event_type_key(event_type: EventType) -> &'static str {
    match event_type {
        EventType::AuthenticationSuccess => "AuthenticationSuccess",
        EventType::AuthenticationFailure => "AuthenticationFailure",
        EventType::AccountManagement => "AccountManagement",
        EventType::PrivilegeEscalation => "PrivilegeEscalation",
        EventType::ServiceInstallation => "ServiceInstallation",
        EventType::ScheduledTask => "ScheduledTask",
        EventType::ProcessCreation => "ProcessCreation",
        EventType::PowerShellExecution => "PowerShellExecution",
        EventType::BurstActivity => "BurstActivity",
        EventType::CorrelatedActivity => "CorrelatedActivity",
        EventType::AnomalousActivity => "AnomalousActivity",
        EventType::SuspiciousActivity => "SuspiciousActivity",
        EventType::Unknown => "Unknown",
    }
}

fn event_type_from_key(key: &str) -> EventType {
    match key {
        "AuthenticationSuccess" => EventType::AuthenticationSuccess,
        "AuthenticationFailure" => EventType::AuthenticationFailure,
        "AccountManagement" => EventType::AccountManagement,
        "PrivilegeEscalation" => EventType::PrivilegeEscalation,
        "ServiceInstallation" => EventType::ServiceInstallation,
        "ScheduledTask" => EventType::ScheduledTask,
        "ProcessCreation" => EventType::ProcessCreation,
        "PowerShellExecution" => EventType::PowerShellExecution,
        "BurstActivity" => EventType::BurstActivity,
        "CorrelatedActivity" => EventType::CorrelatedActivity,
        "AnomalousActivity" => EventType::AnomalousActivity,
        "SuspiciousActivity" => EventType::SuspiciousActivity,
        _ => EventType::Unknown,
    }
}

#[async_trait]
impl LlmClient for EnsembleClient {
    async fn analyze(
        &self,
        event: &LogEvent,
        neighbours: &[LogEvent],
        cancel: CancellationToken,
    ) -> Result<String, LlmError> {
        let responses = self.collect_responses(event, neighbours, cancel.clone()).await;

        if responses.len() < self.config.min_successful_models {
            self.stats.partial_fallbacks.fetch_add(1, Ordering::Relaxed);
            if let Some((_, best)) = responses.iter().max_by_key(|(_, r)| r.confidence) {
                return Ok(serde_json::to_string(best)?);
            }
            return self.default.analyze(event, neighbours, cancel).await;
        }

        let aggregated = self.aggregate(&responses);
        Ok(serde_json::to_string(&aggregated)?)
    }

    /// `generate` is never voted; it falls through to the default client
    /// unchanged, per the preserved pass-through design decision.
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cancel: CancellationToken,
    ) -> Result<String, LlmError> {
        self.default.generate(system_prompt, user_prompt, cancel).await
    }
}
