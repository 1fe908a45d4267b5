//! 分发属性测试
//!
//! 随机并发分发下的计数器不变式、重复提交幂等性与优先级顺序。

mod common;

use std::collections::HashMap;

use common::{engine, tenant};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rule_engine::{
    ActionSpec, DispatchMode, ExecutionOutcome, Operator, RuleDraft, RuleNode, RuleStatus,
    RuleType, TriggerContext, TriggerType,
};
use serde_json::json;

fn event(entity_id: &str, amount: i64) -> TriggerContext {
    TriggerContext::new(
        "order",
        entity_id,
        TriggerType::EntityCreated,
        json!({"amount": amount}),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_counters_stay_consistent_under_concurrent_dispatch() {
    let engine = engine();
    let tenant = tenant();

    let drafts = vec![
        RuleDraft::new("大额订单", RuleType::Processing, TriggerType::EntityCreated)
            .with_conditions(RuleNode::condition("amount", Operator::Gte, 500))
            .with_action(ActionSpec::new("tag-entity", json!({"tag": "large"}))),
        RuleDraft::new("小额订单", RuleType::Processing, TriggerType::EntityCreated)
            .with_conditions(RuleNode::condition("amount", Operator::Lt, 100))
            .with_action(ActionSpec::new("tag-entity", json!({"tag": "small"}))),
        RuleDraft::new("外部同步", RuleType::Integration, TriggerType::EntityCreated)
            .with_conditions(RuleNode::condition("amount", Operator::Between, json!([200, 800])))
            .with_action(ActionSpec::new("always-fail", json!({}))),
        RuleDraft::new("全部订单", RuleType::Workflow, TriggerType::EntityCreated)
            .with_action(ActionSpec::new("categorize", json!({"category": "orders"}))),
    ];

    let mut rule_ids = Vec::new();
    for draft in drafts {
        let rule = engine
            .store()
            .create(&tenant, draft.with_status(RuleStatus::Active))
            .await
            .unwrap();
        rule_ids.push(rule.id);
    }

    // 预先生成随机负载：40 个订单，另有 20 次随机挑选的重复提交
    let mut rng = StdRng::seed_from_u64(20260317);
    let mut amounts: HashMap<String, i64> = HashMap::new();
    let mut events = Vec::new();
    for i in 0..40 {
        let entity_id = format!("order-{i}");
        let amount = rng.random_range(0..1000);
        amounts.insert(entity_id.clone(), amount);
        events.push((entity_id, amount));
    }
    for _ in 0..20 {
        let entity_id = format!("order-{}", rng.random_range(0..40u32));
        let amount = amounts[&entity_id];
        events.push((entity_id, amount));
    }

    let mut handles = Vec::new();
    for (entity_id, amount) in events {
        let dispatcher = engine.dispatcher.clone();
        let tenant = tenant.clone();
        handles.push(tokio::spawn(async move {
            dispatcher
                .dispatch(&tenant, event(&entity_id, amount), DispatchMode::Automatic)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for rule_id in rule_ids {
        let rule = engine.store().get(&tenant, rule_id).await.unwrap();
        let counters = &rule.counters;
        assert_eq!(
            counters.execution_count,
            counters.success_count + counters.error_count,
            "规则 {} 计数器不一致",
            rule.name
        );

        let (records, total) = engine
            .dispatcher
            .ledger()
            .history(&tenant, rule_id, 1, 1000)
            .await
            .unwrap();
        assert_eq!(total as usize, records.len());

        let matched = records.iter().filter(|r| r.outcome.is_matched()).count() as i64;
        assert_eq!(counters.execution_count, matched);

        // 每个订单对每条规则至多一条记录
        let mut per_entity: HashMap<&str, usize> = HashMap::new();
        for record in &records {
            *per_entity.entry(record.context.entity_id.as_str()).or_default() += 1;
        }
        assert!(per_entity.values().all(|&n| n == 1));
        assert_eq!(per_entity.len(), 40);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_concurrent_dispatches_apply_once() {
    let engine = engine();
    let tenant = tenant();
    let rule = engine
        .store()
        .create(
            &tenant,
            RuleDraft::new("发票标记", RuleType::EmailFilter, TriggerType::EntityCreated)
                .with_conditions(RuleNode::condition("subject", Operator::Contains, "invoice"))
                .with_action(ActionSpec::new("tag-entity", json!({"tag": "finance"})))
                .with_status(RuleStatus::Active),
        )
        .await
        .unwrap();

    let context = TriggerContext::new(
        "email",
        "m-1",
        TriggerType::EntityCreated,
        json!({"subject": "invoice", "meta": {"b": 2, "a": 1}}),
    );

    let mut handles = Vec::new();
    for _ in 0..10 {
        let dispatcher = engine.dispatcher.clone();
        let tenant = tenant.clone();
        let context = context.clone();
        handles.push(tokio::spawn(async move {
            dispatcher
                .dispatch(&tenant, context, DispatchMode::Automatic)
                .await
                .unwrap()
        }));
    }

    let mut recorded = 0;
    let mut deduplicated = 0;
    for handle in handles {
        let summary = handle.await.unwrap();
        recorded += summary.records.len();
        deduplicated += summary.deduplicated;
    }

    assert_eq!(recorded, 1);
    assert_eq!(deduplicated, 9);
    assert_eq!(engine.sink.len(), 1);

    let rule = engine.store().get(&tenant, rule.id).await.unwrap();
    assert_eq!(rule.counters.execution_count, 1);

    // 键顺序不同的相同数据同样视为重复
    let reordered = TriggerContext::new(
        "email",
        "m-1",
        TriggerType::EntityCreated,
        json!({"meta": {"a": 1, "b": 2}, "subject": "invoice"}),
    );
    let summary = engine
        .dispatcher
        .dispatch(&tenant, reordered, DispatchMode::Automatic)
        .await
        .unwrap();
    assert_eq!(summary.deduplicated, 1);
    assert!(summary.records.is_empty());
}

#[tokio::test]
async fn test_side_effects_follow_priority_order() {
    let engine = engine();
    let tenant = tenant();

    for priority in [1, 10, 5] {
        engine
            .store()
            .create(
                &tenant,
                RuleDraft::new(
                    format!("优先级 {priority}"),
                    RuleType::Processing,
                    TriggerType::MessageReceived,
                )
                .with_action(ActionSpec::new(
                    "tag-entity",
                    json!({"tag": format!("p{priority}")}),
                ))
                .with_priority(priority)
                .with_status(RuleStatus::Active),
            )
            .await
            .unwrap();
    }

    let summary = engine
        .dispatcher
        .dispatch(
            &tenant,
            TriggerContext::new("email", "m-1", TriggerType::MessageReceived, json!({})),
            DispatchMode::Automatic,
        )
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 3);

    let tags: Vec<String> = engine
        .sink
        .effects()
        .into_iter()
        .map(|e| e.params["tag"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(tags, vec!["p10", "p5", "p1"]);

    let priorities: Vec<&str> = summary.records.iter().map(|r| r.rule_name.as_str()).collect();
    assert_eq!(priorities, vec!["优先级 10", "优先级 5", "优先级 1"]);
}

#[tokio::test]
async fn test_equal_priority_runs_in_creation_order() {
    let engine = engine();
    let tenant = tenant();

    for name in ["第一", "第二", "第三"] {
        engine
            .store()
            .create(
                &tenant,
                RuleDraft::new(name, RuleType::Processing, TriggerType::EntityUpdated)
                    .with_action(ActionSpec::new("tag-entity", json!({"tag": name})))
                    .with_priority(7)
                    .with_status(RuleStatus::Active),
            )
            .await
            .unwrap();
    }

    engine
        .dispatcher
        .dispatch(
            &tenant,
            TriggerContext::new("task", "t-1", TriggerType::EntityUpdated, json!({})),
            DispatchMode::Automatic,
        )
        .await
        .unwrap();

    let tags: Vec<String> = engine
        .sink
        .effects()
        .into_iter()
        .map(|e| e.params["tag"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(tags, vec!["第一", "第二", "第三"]);
}

#[tokio::test]
async fn test_non_active_rules_never_auto_fire() {
    let engine = engine();
    let tenant = tenant();

    for status in [
        RuleStatus::Draft,
        RuleStatus::Active,
        RuleStatus::Inactive,
        RuleStatus::Testing,
    ] {
        let rule = engine
            .store()
            .create(
                &tenant,
                RuleDraft::new(
                    format!("{status}"),
                    RuleType::Processing,
                    TriggerType::EntityCreated,
                )
                .with_action(ActionSpec::new("tag-entity", json!({"tag": status.as_str()})))
                .with_status(if status == RuleStatus::Draft {
                    RuleStatus::Draft
                } else {
                    RuleStatus::Active
                }),
            )
            .await
            .unwrap();
        if status != RuleStatus::Draft && status != RuleStatus::Active {
            engine
                .store()
                .set_status(&tenant, rule.id, status)
                .await
                .unwrap();
        }
    }

    let summary = engine
        .dispatcher
        .dispatch(
            &tenant,
            TriggerContext::new("email", "m-1", TriggerType::EntityCreated, json!({})),
            DispatchMode::Automatic,
        )
        .await
        .unwrap();

    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.records.len(), 1);
    assert_eq!(summary.records[0].rule_name, "ACTIVE");
    assert_eq!(summary.records[0].outcome, ExecutionOutcome::MatchedSuccess);
}
