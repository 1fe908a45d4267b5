//! 内置规则模板
//!
//! 模板是未保存的草稿（状态 DRAFT），客户端可以直接修改后创建规则。

use serde::Serialize;
use serde_json::json;

use crate::models::{ActionSpec, Condition, RuleDraft, RuleNode, RuleType, TriggerType};
use crate::operators::Operator;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTemplate {
    pub id: &'static str,
    #[serde(flatten)]
    pub draft: RuleDraft,
}

pub fn builtin_templates() -> Vec<RuleTemplate> {
    vec![
        vip_email_processing(),
        spam_filter(),
        out_of_office_reply(),
        invoice_tagging(),
    ]
}

pub fn find_template(id: &str) -> Option<RuleTemplate> {
    builtin_templates().into_iter().find(|t| t.id == id)
}

fn vip_email_processing() -> RuleTemplate {
    let mut draft = RuleDraft::new(
        "VIP Email Processing",
        RuleType::Processing,
        TriggerType::MessageReceived,
    )
    .with_description("VIP 联系人来信自动创建跟进任务并通知")
    .with_entity_types(&["email"])
    .with_conditions(RuleNode::and(vec![
        RuleNode::Condition(
            Condition::new("sender.domain", Operator::Eq, "vipcompany.com").ignore_case(),
        ),
        RuleNode::Condition(Condition::new("priority", Operator::Eq, "HIGH").with_default("NORMAL")),
    ]))
    .with_action(ActionSpec::new(
        "create-followup-task",
        json!({"title": "Respond to VIP email", "priority": "HIGH", "context": "@calls"}),
    ))
    .with_action(ActionSpec::new("categorize", json!({"category": "VIP"})))
    .with_action(
        ActionSpec::new(
            "send-notification",
            json!({"message": "VIP email received", "channels": ["email", "slack"]}),
        )
        .best_effort(),
    )
    .with_priority(80);
    draft.category = Some("MESSAGE_PROCESSING".to_string());

    RuleTemplate {
        id: "vip-email-processing",
        draft,
    }
}

fn spam_filter() -> RuleTemplate {
    let mut draft = RuleDraft::new("Spam Email Filter", RuleType::EmailFilter, TriggerType::MessageReceived)
        .with_description("按关键词和紧急度识别垃圾邮件并移入垃圾箱")
        .with_entity_types(&["email"])
        .with_conditions(RuleNode::and(vec![
            RuleNode::Condition(
                Condition::new("subject", Operator::Regex, r"\b(viagra|lottery|winner)\b")
                    .ignore_case(),
            ),
            RuleNode::Condition(
                Condition::new("urgencyScore", Operator::Between, json!([0, 20])).with_default(0),
            ),
        ]))
        .with_action(ActionSpec::new("categorize", json!({"category": "SPAM"})))
        .with_action(ActionSpec::new("add-to-mailbox", json!({"mailbox": "spam"})))
        .with_priority(90);
    draft.category = Some("FILTERING".to_string());

    RuleTemplate {
        id: "spam-filter",
        draft,
    }
}

fn out_of_office_reply() -> RuleTemplate {
    let mut draft = RuleDraft::new(
        "Out of Office Auto-Reply",
        RuleType::AutoReply,
        TriggerType::MessageReceived,
    )
    .with_description("非工作时间（18:00 至次日 08:00）自动回复")
    .with_entity_types(&["email"])
    .with_conditions(RuleNode::or(vec![
        RuleNode::condition("receivedHour", Operator::Gte, 18),
        RuleNode::condition("receivedHour", Operator::Lt, 8),
    ]))
    .with_action(ActionSpec::new(
        "send-auto-reply",
        json!({
            "subject": "Out of Office",
            "body": "I am currently out of office. I will respond to your email as soon as possible.",
            "delay": 0
        }),
    ))
    .with_priority(10);
    draft.category = Some("COMMUNICATION".to_string());

    RuleTemplate {
        id: "out-of-office-reply",
        draft,
    }
}

fn invoice_tagging() -> RuleTemplate {
    let mut draft = RuleDraft::new("Invoice Tagging", RuleType::EmailFilter, TriggerType::EntityCreated)
        .with_description("主题包含 invoice 的邮件打上财务标签")
        .with_entity_types(&["email"])
        .with_conditions(RuleNode::Condition(
            Condition::new("subject", Operator::Contains, "invoice").ignore_case(),
        ))
        .with_action(ActionSpec::new("tag-entity", json!({"tag": "finance"})))
        .with_priority(5);
    draft.category = Some("FINANCE".to_string());

    RuleTemplate {
        id: "invoice-tagging",
        draft,
    }
}
