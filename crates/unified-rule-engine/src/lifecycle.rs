//! 规则生命周期状态机
//!
//! ```text
//! DRAFT ──> ACTIVE <──> INACTIVE
//!           ACTIVE <──> TESTING
//! 任意非终态 ──> ERROR ──> ACTIVE（人工复位）
//! 任意非终态 ──> DEPRECATED（终态）
//! ```

use crate::error::{Result, RuleError};
use crate::models::RuleStatus;

/// 状态迁移是否合法
pub fn can_transition(from: RuleStatus, to: RuleStatus) -> bool {
    use RuleStatus::*;

    if from == to || from == Deprecated {
        return false;
    }

    match to {
        Error | Deprecated => true,
        Active => matches!(from, Draft | Inactive | Testing | Error),
        Inactive | Testing => from == Active,
        Draft => false,
    }
}

/// 校验状态迁移
pub fn validate_transition(from: RuleStatus, to: RuleStatus) -> Result<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(RuleError::InvalidTransition { from, to })
    }
}

/// 开关操作的目标状态，仅支持 ACTIVE 与 INACTIVE 互切
pub fn toggle_target(from: RuleStatus) -> Result<RuleStatus> {
    match from {
        RuleStatus::Active => Ok(RuleStatus::Inactive),
        RuleStatus::Inactive => Ok(RuleStatus::Active),
        other => Err(RuleError::InvalidTransition {
            from: other,
            to: RuleStatus::Active,
        }),
    }
}

/// 是否参与自动触发匹配
pub fn is_auto_eligible(status: RuleStatus) -> bool {
    status == RuleStatus::Active
}

/// 是否允许手动执行（预览）
pub fn is_manual_eligible(status: RuleStatus) -> bool {
    status != RuleStatus::Deprecated
}

/// 进入该状态前规则必须具备至少一个动作
pub fn requires_actions(status: RuleStatus) -> bool {
    !matches!(status, RuleStatus::Draft | RuleStatus::Deprecated)
}
