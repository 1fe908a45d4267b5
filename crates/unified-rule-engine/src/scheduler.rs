//! 定时规则调度
//!
//! 轮询所有租户中 ACTIVE 的 SCHEDULE 规则，cron 表达式在上次检查与本次检查之间
//! 有触发点时，以 SCHEDULE 触发分发该规则。
//! 触发数据中携带触发时间，多实例部署时同一触发点由账本去重保证只执行一次。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::compiler::parse_schedule;
use crate::dispatcher::{DispatchMode, TriggerDispatcher};
use crate::error::Result;
use crate::models::{Rule, TriggerContext, TriggerType};

/// 定时触发的实体类型
pub const SCHEDULE_ENTITY_TYPE: &str = "schedule";

pub struct ScheduleTicker {
    dispatcher: Arc<TriggerDispatcher>,
    poll_interval: Duration,
}

impl ScheduleTicker {
    pub fn new(dispatcher: Arc<TriggerDispatcher>, poll_interval: Duration) -> Self {
        Self {
            dispatcher,
            poll_interval,
        }
    }

    /// 主循环：直到 `shutdown` 收到 true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval = ?self.poll_interval, "定时规则调度已启动");
        let mut last_check = Utc::now();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let now = Utc::now();
            match self.tick(last_check, now).await {
                Ok(fired) if fired > 0 => info!(fired, "定时规则已触发"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "定时规则轮询失败"),
            }
            last_check = now;
        }

        info!("定时规则调度已停止");
    }

    /// 触发 (from, to] 区间内到期的规则，返回触发的规则数
    pub async fn tick(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<usize> {
        let rules = self.dispatcher.store().list_scheduled().await?;
        let mut fired = 0;

        for rule in rules {
            let Some(fire_at) = Self::due_at(&rule, from, to) else {
                continue;
            };

            let context = TriggerContext {
                entity_type: SCHEDULE_ENTITY_TYPE.to_string(),
                entity_id: rule.id.to_string(),
                trigger_type: TriggerType::Schedule,
                trigger_data: json!({ "scheduledAt": fire_at.to_rfc3339() }),
                occurred_at: fire_at,
            };

            match self
                .dispatcher
                .dispatch(&rule.tenant_id, context, DispatchMode::Scheduled { rule_id: rule.id })
                .await
            {
                Ok(summary) => {
                    debug!(rule_id = %rule.id, %fire_at, records = summary.records.len(), "定时规则已分发");
                    fired += 1;
                }
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => warn!(rule_id = %rule.id, error = %e, "定时规则分发失败"),
            }
        }

        Ok(fired)
    }

    /// 区间内最近一次触发点
    fn due_at(rule: &Rule, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let expr = rule.schedule.as_deref()?;
        let schedule = match parse_schedule(expr) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(rule_id = %rule.id, error = %e, "跳过 cron 表达式无效的规则");
                return None;
            }
        };

        schedule.after(&from).take_while(|t| *t <= to).last()
    }
}
