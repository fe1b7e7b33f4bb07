//! Token usage accounting and cost estimates.
//!
//! Every oracle call reports a [`TokenUsage`]; stages return an [`LlmUsage`]
//! accumulator which the orchestrator folds with [`LlmUsage::merge`].
//! Refinement runs on the premium tier, everything else on standard.
//!
//! | Provider  | Premium ($/1M in, out) | Standard ($/1M in, out) |
//! |-----------|------------------------|-------------------------|
//! | openai    | 2.00, 8.00             | 0.40, 1.60              |
//! | anthropic | 3.00, 15.00            | 0.80, 4.00              |
//! | gemini    | 1.25, 10.00            | 0.30, 2.50              |

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::config::LlmProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Standard,
    Premium,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Standard => "standard",
            ModelTier::Premium => "premium",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
    }
}

/// Usage per model tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub standard: TokenUsage,
    pub premium: TokenUsage,
}

impl LlmUsage {
    pub fn record(&mut self, tier: ModelTier, usage: TokenUsage) {
        match tier {
            ModelTier::Standard => self.standard += usage,
            ModelTier::Premium => self.premium += usage,
        }
    }

    pub fn merge(&mut self, other: LlmUsage) {
        self.standard += other.standard;
        self.premium += other.premium;
    }

    pub fn get(&self, tier: ModelTier) -> TokenUsage {
        match tier {
            ModelTier::Standard => self.standard,
            ModelTier::Premium => self.premium,
        }
    }

    /// Estimated spend in US dollars.
    pub fn estimated_cost(&self, provider: LlmProvider) -> f64 {
        [ModelTier::Standard, ModelTier::Premium]
            .into_iter()
            .map(|tier| {
                let price = price_per_million(provider, tier);
                let usage = self.get(tier);
                (usage.prompt_tokens as f64 * price.prompt
                    + usage.completion_tokens as f64 * price.completion)
                    / 1_000_000.0
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Price {
    pub prompt: f64,
    pub completion: f64,
}

pub fn price_per_million(provider: LlmProvider, tier: ModelTier) -> Price {
    let (prompt, completion) = match (provider, tier) {
        (LlmProvider::OpenAi, ModelTier::Premium) => (2.0, 8.0),
        (LlmProvider::OpenAi, ModelTier::Standard) => (0.4, 1.6),
        (LlmProvider::Anthropic, ModelTier::Premium) => (3.0, 15.0),
        (LlmProvider::Anthropic, ModelTier::Standard) => (0.8, 4.0),
        (LlmProvider::Gemini, ModelTier::Premium) => (1.25, 10.0),
        (LlmProvider::Gemini, ModelTier::Standard) => (0.3, 2.5),
    };
    Price { prompt, completion }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_merge_by_tier() {
        let mut a = LlmUsage::default();
        a.record(ModelTier::Standard, TokenUsage::new(10, 2));
        a.record(ModelTier::Standard, TokenUsage::new(5, 1));
        let mut b = LlmUsage::default();
        b.record(ModelTier::Premium, TokenUsage::new(100, 20));
        a.merge(b);
        assert_eq!(a.standard, TokenUsage::new(15, 3));
        assert_eq!(a.premium, TokenUsage::new(100, 20));
        assert_eq!(a.premium.total(), 120);
    }

    #[test]
    fn cost_uses_provider_table() {
        let mut usage = LlmUsage::default();
        usage.record(ModelTier::Standard, TokenUsage::new(1_000_000, 1_000_000));
        usage.record(ModelTier::Premium, TokenUsage::new(1_000_000, 0));
        let cost = usage.estimated_cost(LlmProvider::OpenAi);
        assert!((cost - (0.4 + 1.6 + 2.0)).abs() < 1e-9);
        let cost = usage.estimated_cost(LlmProvider::Anthropic);
        assert!((cost - (0.8 + 4.0 + 3.0)).abs() < 1e-9);
    }

    #[test]
    fn empty_usage_costs_nothing() {
        assert_eq!(LlmUsage::default().estimated_cost(LlmProvider::Gemini), 0.0);
    }
}
