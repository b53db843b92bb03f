//! Token budget: how many history rounds fit a backend's context window

use bionic_core::config::TokenBudgetConfig;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct UsageStats {
    observed_rounds: u64,
    /// Running mean of tokens per round, valid once `observed_rounds > 0`.
    avg_tokens_per_round: f64,
}

/// Shared by every request using one engine. Only the running mean sits
/// behind the mutex; per-call shape travels with each `record_usage`.
#[derive(Debug)]
pub struct TokenBudgetManager {
    context_tokens: u32,
    config: TokenBudgetConfig,
    stats: Mutex<UsageStats>,
}

impl TokenBudgetManager {
    pub fn new(context_tokens: u32, config: TokenBudgetConfig) -> Self {
        Self {
            context_tokens,
            config,
            stats: Mutex::new(UsageStats::default()),
        }
    }

    /// Fold one call's usage into the per-round average. The system prompt
    /// estimate is excluded and the cost is spread over the `history_rounds`
    /// that call sent plus the current exchange.
    pub fn record_usage(
        &self,
        prompt_tokens: u32,
        completion_tokens: u32,
        system_prompt_tokens: u32,
        history_rounds: usize,
    ) {
        let conversational = prompt_tokens.saturating_sub(system_prompt_tokens) as f64
            + completion_tokens as f64;
        let per_round = conversational / (history_rounds as f64 + 1.0);
        self.with_stats(|s| {
            s.observed_rounds += 1;
            s.avg_tokens_per_round +=
                (per_round - s.avg_tokens_per_round) / s.observed_rounds as f64;
            debug!(
                "token usage recorded: prompt={} completion={} per_round={:.1} avg={:.1}",
                prompt_tokens, completion_tokens, per_round, s.avg_tokens_per_round
            );
        });
    }

    pub fn avg_tokens_per_round(&self) -> u32 {
        self.with_stats(|s| self.effective_avg(s))
    }

    pub fn observed_rounds(&self) -> u64 {
        self.with_stats(|s| s.observed_rounds)
    }

    /// Never below `min_history_rounds`, even when the window is already
    /// exhausted by reserved output and system prompt.
    pub fn dynamic_max_rounds(&self, system_prompt_tokens: u32) -> usize {
        self.with_stats(|s| {
            let min = self.config.min_history_rounds;
            let available = self.context_tokens as i64
                - self.config.reserved_output_tokens as i64
                - system_prompt_tokens as i64;
            if available <= 0 {
                return min;
            }
            let rounds = (available / self.effective_avg(s) as i64) as usize;
            rounds.max(min)
        })
    }

    fn effective_avg(&self, s: &UsageStats) -> u32 {
        let avg = if s.observed_rounds == 0 {
            self.config.avg_tokens_per_round
        } else {
            s.avg_tokens_per_round.round() as u32
        };
        avg.max(1)
    }

    fn with_stats<R>(&self, f: impl FnOnce(&mut UsageStats) -> R) -> R {
        let mut guard = match self.stats.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}
