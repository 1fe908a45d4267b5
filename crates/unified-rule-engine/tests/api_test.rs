//! HTTP 接口测试
//!
//! 通过 `tower::ServiceExt::oneshot` 直接驱动路由，覆盖请求转换、租户头与错误映射。

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use common::{Engine, engine};
use rule_engine::StatsAggregator;
use rule_engine::api::{self, AppState, TENANT_HEADER};
use serde_json::{Value, json};
use tower::ServiceExt;

const ORG: &str = "org-1";

fn app(engine: &Engine) -> Router {
    let state = AppState::new(
        engine.dispatcher.clone(),
        StatsAggregator::new(
            Arc::new(engine.memory.clone()),
            Arc::new(engine.memory.clone()),
        ),
        chrono::Duration::hours(24),
    );
    api::router(state, Duration::from_secs(5))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send_as(app, Some(ORG), method, uri, body).await
}

async fn send_as(
    app: &Router,
    tenant: Option<&str>,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(tenant) = tenant {
        builder = builder.header(TENANT_HEADER, tenant);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn invoice_rule(status: &str) -> Value {
    json!({
        "name": "发票标记",
        "ruleType": "EMAIL_FILTER",
        "triggerType": "ENTITY_CREATED",
        "entityTypes": ["email"],
        "conditions": {
            "type": "condition",
            "field": "subject",
            "operator": "CONTAINS",
            "value": "invoice",
            "ignoreCase": true
        },
        "actions": [{"capability": "tag-entity", "params": {"tag": "finance"}}],
        "priority": 10,
        "status": status
    })
}

async fn create(app: &Router, body: Value) -> String {
    let (status, json) = send(app, Method::POST, "/api/v1/rules", Some(body)).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    json["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_create_get_and_list_rules() {
    let engine = engine();
    let app = app(&engine);

    let (status, json) = send(
        &app,
        Method::POST,
        "/api/v1/rules",
        Some(invoice_rule("ACTIVE")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["code"], "SUCCESS");
    let data = &json["data"];
    assert_eq!(data["status"], "ACTIVE");
    assert_eq!(data["isActive"], true);
    assert_eq!(data["version"], 1);
    assert_eq!(data["executionCount"], 0);
    assert_eq!(data["successRate"], Value::Null);

    let id = data["id"].as_str().unwrap();
    let (status, json) = send(&app, Method::GET, &format!("/api/v1/rules/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["name"], "发票标记");
    assert_eq!(json["data"]["conditions"]["operator"], "CONTAINS");

    create(
        &app,
        json!({
            "name": "外出自动回复",
            "ruleType": "AUTO_REPLY",
            "triggerType": "MESSAGE_RECEIVED",
            "actions": [{"capability": "send-auto-reply", "params": {"body": "休假中"}}]
        }),
    )
    .await;

    let (_, json) = send(&app, Method::GET, "/api/v1/rules", None).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 2);

    let (_, json) = send(&app, Method::GET, "/api/v1/rules?type=AUTO_REPLY", None).await;
    let rules = json["data"].as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["status"], "DRAFT");
    assert_eq!(rules[0]["isActive"], false);

    let (_, json) = send(&app, Method::GET, "/api/v1/rules?search=INVOICE", None).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 0);
    let (_, json) = send(&app, Method::GET, "/api/v1/rules?search=%E5%8F%91%E7%A5%A8", None).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_rejects_invalid_definitions() {
    let engine = engine();
    let app = app(&engine);

    // 浅层字段校验
    let mut body = invoice_rule("DRAFT");
    body["name"] = json!("");
    let (status, json) = send(&app, Method::POST, "/api/v1/rules", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "VALIDATION_ERROR");

    // 未知能力由编译器拒绝
    let mut body = invoice_rule("DRAFT");
    body["actions"] = json!([{"capability": "launch-rocket", "params": {}}]);
    let (status, json) = send(&app, Method::POST, "/api/v1/rules", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");

    // ACTIVE 规则必须有动作
    let mut body = invoice_rule("ACTIVE");
    body["actions"] = json!([]);
    let (status, _) = send(&app, Method::POST, "/api/v1/rules", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 未知操作符
    let mut body = invoice_rule("DRAFT");
    body["conditions"]["operator"] = json!("LIKE");
    let (status, json) = send(&app, Method::POST, "/api/v1/rules", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");

    let (_, json) = send(&app, Method::GET, "/api/v1/rules", None).await;
    assert!(json["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_patch_toggle_status_and_delete() {
    let engine = engine();
    let app = app(&engine);
    let id = create(&app, invoice_rule("ACTIVE")).await;
    let uri = format!("/api/v1/rules/{id}");

    let (status, json) = send(
        &app,
        Method::PATCH,
        &uri,
        Some(json!({"priority": 50, "conditions": null})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["priority"], 50);
    assert_eq!(json["data"]["version"], 2);
    assert_eq!(json["data"]["conditions"], Value::Null);
    assert_eq!(json["data"]["name"], "发票标记");

    let (status, json) = send(&app, Method::POST, &format!("{uri}/toggle"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "INACTIVE");
    assert_eq!(json["data"]["isActive"], false);

    let (_, json) = send(&app, Method::POST, &format!("{uri}/toggle"), None).await;
    assert_eq!(json["data"]["status"], "ACTIVE");

    let (status, json) = send(
        &app,
        Method::POST,
        &format!("{uri}/status"),
        Some(json!({"status": "DEPRECATED"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "DEPRECATED");

    // 终态不可恢复
    let (status, json) = send(
        &app,
        Method::POST,
        &format!("{uri}/status"),
        Some(json!({"status": "ACTIVE"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_TRANSITION");

    let (status, _) = send(&app, Method::POST, &format!("{uri}/toggle"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert!(json.get("data").is_none());

    let (status, json) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_duplicate_returns_unsaved_draft() {
    let engine = engine();
    let app = app(&engine);
    let id = create(&app, invoice_rule("ACTIVE")).await;

    let (status, json) = send(
        &app,
        Method::POST,
        &format!("/api/v1/rules/{id}/duplicate"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "已生成规则副本，保存后生效");
    let draft = json["data"].clone();
    assert_eq!(draft["name"], "发票标记 (copy)");
    assert_eq!(draft["status"], "DRAFT");
    assert_eq!(draft["isActive"], false);
    assert!(draft.get("id").is_none());

    // 副本尚未保存
    let (_, json) = send(&app, Method::GET, "/api/v1/rules", None).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);

    let mut body = draft;
    body.as_object_mut().unwrap().remove("isActive");
    let copy_id = create(&app, body).await;
    assert_ne!(copy_id, id);
}

#[tokio::test]
async fn test_trigger_execute_history_and_stats() {
    let engine = engine();
    let app = app(&engine);
    let id = create(&app, invoice_rule("ACTIVE")).await;

    let trigger = json!({
        "entityType": "email",
        "entityId": "m-1",
        "triggerType": "ENTITY_CREATED",
        "triggerData": {"subject": "Your Invoice #42"}
    });
    let (status, json) = send(&app, Method::POST, "/api/v1/triggers", Some(trigger.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let summary = &json["data"];
    assert_eq!(summary["candidates"], 1);
    assert_eq!(summary["succeeded"], 1);
    assert_eq!(summary["records"][0]["outcome"], "MATCHED_SUCCESS");
    assert_eq!(engine.sink.len(), 1);

    // 重复提交不再产生副作用
    let (_, json) = send(&app, Method::POST, "/api/v1/triggers", Some(trigger)).await;
    assert_eq!(json["data"]["deduplicated"], 1);
    assert_eq!(engine.sink.len(), 1);

    // 不匹配的手动执行
    let (status, json) = send(
        &app,
        Method::POST,
        &format!("/api/v1/rules/{id}/execute"),
        Some(json!({
            "entityType": "email",
            "entityId": "m-2",
            "triggerData": {"subject": "hello"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["outcome"], "NOT_MATCHED");
    assert_eq!(json["data"]["mode"], "MANUAL");

    let (_, json) = send(&app, Method::GET, &format!("/api/v1/rules/{id}"), None).await;
    assert_eq!(json["data"]["executionCount"], 1);
    assert_eq!(json["data"]["successCount"], 1);
    assert_eq!(json["data"]["successRate"], 1.0);

    let (status, json) = send(
        &app,
        Method::GET,
        &format!("/api/v1/rules/{id}/executions?page=1&pageSize=1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let page = &json["data"];
    assert_eq!(page["total"], 2);
    assert_eq!(page["totalPages"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    // 新到旧
    assert_eq!(page["items"][0]["outcome"], "NOT_MATCHED");

    let (status, json) = send(&app, Method::GET, "/api/v1/rules/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    let stats = &json["data"];
    assert_eq!(stats["totalRules"], 1);
    assert_eq!(stats["activeRules"], 1);
    assert_eq!(stats["inactiveRules"], 0);
    assert_eq!(stats["executions"], 1);
    assert_eq!(stats["executions24h"], 1);
    assert_eq!(stats["successRate"], 1.0);
    assert_eq!(stats["windowHours"], 24);

    let (_, json) = send(&app, Method::GET, "/api/v1/rules/stats?windowHours=1", None).await;
    assert_eq!(json["data"]["windowHours"], 1);
    assert_eq!(json["data"]["executions24h"], 1);

    let (status, _) = send(&app, Method::GET, "/api/v1/rules/stats?windowHours=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_manual_execution_rejects_foreign_entity_type() {
    let engine = engine();
    let app = app(&engine);
    let id = create(&app, invoice_rule("ACTIVE")).await;

    let (status, json) = send(
        &app,
        Method::POST,
        &format!("/api/v1/rules/{id}/execute"),
        Some(json!({"entityType": "task", "entityId": "t-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_templates() {
    let engine = engine();
    let app = app(&engine);

    let (status, json) = send(&app, Method::GET, "/api/v1/rules/templates", None).await;
    assert_eq!(status, StatusCode::OK);
    let templates = json["data"].as_array().unwrap();
    assert!(templates.iter().any(|t| t["id"] == "spam-filter"));

    let (status, json) = send(&app, Method::GET, "/api/v1/rules/templates/invoice-tagging", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["id"], "invoice-tagging");

    let (status, json) = send(&app, Method::GET, "/api/v1/rules/templates/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "TEMPLATE_NOT_FOUND");
}

#[tokio::test]
async fn test_tenant_header_required_and_isolating() {
    let engine = engine();
    let app = app(&engine);
    let id = create(&app, invoice_rule("ACTIVE")).await;

    let (status, json) = send_as(&app, None, Method::GET, "/api/v1/rules", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "MISSING_TENANT");

    let (status, _) = send_as(&app, Some("   "), Method::GET, "/api/v1/rules", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 其他租户看不到该规则
    let (status, _) = send_as(
        &app,
        Some("org-2"),
        Method::GET,
        &format!("/api/v1/rules/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, json) = send_as(&app, Some("org-2"), Method::GET, "/api/v1/rules", None).await;
    assert!(json["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_rule_is_not_found() {
    let engine = engine();
    let app = app(&engine);
    let missing = uuid::Uuid::new_v4();

    for (method, uri) in [
        (Method::GET, format!("/api/v1/rules/{missing}")),
        (Method::DELETE, format!("/api/v1/rules/{missing}")),
        (Method::POST, format!("/api/v1/rules/{missing}/toggle")),
        (Method::POST, format!("/api/v1/rules/{missing}/duplicate")),
    ] {
        let (status, json) = send(&app, method, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(json["code"], "NOT_FOUND");
    }
}
