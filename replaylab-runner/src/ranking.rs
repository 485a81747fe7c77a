//! Policy ranking: configurable metric selector for comparing exit policies
//! evaluated on the same signal set.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::metrics::RunMetrics;

/// Which metric decides the winning exit policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMetric {
    #[default]
    ProfitFactor,
    WinRate,
    Sharpe,
    TotalReturn,
    Expectancy,
}

impl RankingMetric {
    /// Extract the metric value; `None` when it is undefined (Sharpe only).
    pub fn extract(&self, metrics: &RunMetrics) -> Option<f64> {
        match self {
            Self::ProfitFactor => Some(metrics.profit_factor),
            Self::WinRate => Some(metrics.win_rate),
            Self::Sharpe => metrics.sharpe,
            Self::TotalReturn => Some(metrics.total_return),
            Self::Expectancy => Some(metrics.expectancy_pct),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProfitFactor => "profit_factor",
            Self::WinRate => "win_rate",
            Self::Sharpe => "sharpe",
            Self::TotalReturn => "total_return",
            Self::Expectancy => "expectancy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRank {
    /// 1-based.
    pub rank: usize,
    pub policy: String,
    pub score: Option<f64>,
    pub sample_size: usize,
}

/// Order policies best first.
///
/// Higher score wins; an undefined score ranks below every defined one. Ties
/// go to the larger sample, then to the policy name so the order is total.
pub fn rank_policies<'a>(
    entries: impl IntoIterator<Item = (&'a str, &'a RunMetrics)>,
    metric: RankingMetric,
) -> Vec<PolicyRank> {
    let mut rows: Vec<PolicyRank> = entries
        .into_iter()
        .map(|(policy, m)| PolicyRank {
            rank: 0,
            policy: policy.to_string(),
            score: metric.extract(m).filter(|s| s.is_finite()),
            sample_size: m.sample_size,
        })
        .collect();

    rows.sort_by(|a, b| {
        let by_score = match (a.score, b.score) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_score
            .then_with(|| b.sample_size.cmp(&a.sample_size))
            .then_with(|| a.policy.cmp(&b.policy))
    });
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }
    rows
}

/// First-ranked policy that realized at least one trade.
pub fn winner(ranking: &[PolicyRank]) -> Option<&PolicyRank> {
    ranking.iter().find(|r| r.sample_size > 0)
}
