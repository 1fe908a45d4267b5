//! 失败策略
//!
//! 根据规则最近的已匹配执行结果，判定是否应自动切换到 ERROR 状态。
//! 阈值来自配置，不在引擎内写死。

use automation_shared::config::FailurePolicyConfig;

use crate::models::ExecutionOutcome;

#[derive(Debug, Clone, PartialEq)]
pub enum FailurePolicy {
    Disabled,
    ConsecutiveFailures {
        threshold: usize,
    },
    ErrorRate {
        window: usize,
        max_rate: f64,
        min_executions: usize,
    },
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicyConfig::default().into()
    }
}

impl From<FailurePolicyConfig> for FailurePolicy {
    fn from(config: FailurePolicyConfig) -> Self {
        match config {
            FailurePolicyConfig::Disabled => Self::Disabled,
            FailurePolicyConfig::ConsecutiveFailures { threshold } => Self::ConsecutiveFailures {
                threshold: threshold as usize,
            },
            FailurePolicyConfig::ErrorRate {
                window,
                max_rate,
                min_executions,
            } => Self::ErrorRate {
                window: window as usize,
                max_rate,
                min_executions: min_executions as usize,
            },
        }
    }
}

impl FailurePolicy {
    /// 判定需要回看的最近执行条数，0 表示无需查询
    pub fn lookback(&self) -> usize {
        match self {
            Self::Disabled => 0,
            Self::ConsecutiveFailures { threshold } => *threshold,
            Self::ErrorRate { window, .. } => *window,
        }
    }

    /// `recent` 为最近的已匹配结果（新到旧）
    pub fn should_trip(&self, recent: &[ExecutionOutcome]) -> bool {
        match *self {
            Self::Disabled => false,
            Self::ConsecutiveFailures { threshold } => {
                threshold > 0
                    && recent.len() >= threshold
                    && recent[..threshold]
                        .iter()
                        .all(|o| *o == ExecutionOutcome::MatchedFailure)
            }
            Self::ErrorRate {
                window,
                max_rate,
                min_executions,
            } => {
                let sample = &recent[..recent.len().min(window)];
                if sample.is_empty() || sample.len() < min_executions {
                    return false;
                }
                let failures = sample
                    .iter()
                    .filter(|o| **o == ExecutionOutcome::MatchedFailure)
                    .count();
                failures as f64 / sample.len() as f64 > max_rate
            }
        }
    }
}
