//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::NaiveDate;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use tally_core::db::Database;
use tally_core::models::NewTransaction;
use tower::ServiceExt;

/// One cycle totalling 1000.00 with a payment marker on 2024-11-05
const NOVEMBER_STATEMENT: &str = "date,title,amount
2024-10-10,Supermercado Extra,400.00
2024-10-15,Restaurante Sabor,350.00
2024-10-28,Cinema Parcela 1/3,250.00
2024-11-05,Pagamento recebido,-1000.00";

fn setup_db() -> Database {
    let db = Database::in_memory().unwrap();
    db.seed_categories(&ReconcileConfig::default()).unwrap();
    db
}

fn test_config() -> ServerConfig {
    ServerConfig {
        require_auth: false,
        ..Default::default()
    }
}

fn setup_test_app() -> Router {
    create_router(setup_db(), test_config())
}

/// App plus a handle on the same database and one account
fn setup_with_account() -> (Router, Database, i64) {
    let db = setup_db();
    let account_id = db.upsert_account("Nubank Card", Some("Nubank")).unwrap();
    (create_router(db.clone(), test_config()), db, account_id)
}

fn add_bill(db: &Database, date: NaiveDate, cents: i64) -> i64 {
    let category = db
        .get_category_by_name(&ReconcileConfig::default().bill_category)
        .unwrap()
        .unwrap();
    db.create_transaction(&NewTransaction {
        account_id: None,
        date,
        description: "PAGAMENTO FATURA".to_string(),
        amount: Decimal::new(cents, 2),
        category_id: Some(category.id),
    })
    .unwrap()
}

fn nov(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 11, day).unwrap()
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn post_statement(account_id: i64, content: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/statements?account_id={}", account_id))
        .header("content-type", "text/csv")
        .body(Body::from(content.to_string()))
        .unwrap()
}

// ========== Auth Tests ==========

#[tokio::test]
async fn test_auth_required_rejects_missing_key() {
    let config = ServerConfig {
        require_auth: true,
        api_keys: vec!["secret-key".to_string()],
        ..Default::default()
    };
    let app = create_router(setup_db(), config);

    let response = app.oneshot(get("/api/accounts")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = get_body_json(response).await;
    assert_eq!(json["error"], "Authentication required");
}

#[tokio::test]
async fn test_auth_accepts_valid_api_key() {
    let config = ServerConfig {
        require_auth: true,
        api_keys: vec!["secret-key".to_string()],
        ..Default::default()
    };
    let app = create_router(setup_db(), config);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/me")
                .header("authorization", "Bearer secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["user"], "api-key");
    assert_eq!(json["auth_method"], "api_key");
}

#[tokio::test]
async fn test_auth_rejects_wrong_api_key() {
    let config = ServerConfig {
        require_auth: true,
        api_keys: vec!["secret-key".to_string()],
        ..Default::default()
    };
    let app = create_router(setup_db(), config);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/accounts")
                .header("authorization", "Bearer secret-kez")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[test]
fn test_validate_api_key() {
    let keys = vec!["abc123".to_string(), "other".to_string()];
    assert!(validate_api_key("abc123", &keys));
    assert!(validate_api_key("other", &keys));
    assert!(!validate_api_key("abc12", &keys));
    assert!(!validate_api_key("", &keys));
    assert!(!validate_api_key("abc123", &[]));
}

#[test]
fn test_parse_api_keys() {
    assert_eq!(parse_api_keys(" a, b ,,c "), vec!["a", "b", "c"]);
    assert!(parse_api_keys("").is_empty());
}

#[tokio::test]
async fn test_me_without_auth() {
    let app = setup_test_app();

    let response = app.oneshot(get("/api/me")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["user"], "local-dev");
    assert_eq!(json["auth_method"], "none");
}

#[tokio::test]
async fn test_security_headers() {
    let app = setup_test_app();

    let response = app.oneshot(get("/api/me")).await.unwrap();

    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(headers.get("cache-control").unwrap(), "no-store");
}

// ========== Account & Category Tests ==========

#[tokio::test]
async fn test_create_and_get_account() {
    let db = setup_db();
    let app = create_router(db.clone(), test_config());

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/accounts",
            serde_json::json!({"name": "Inter Card", "issuer": "Inter"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["name"], "Inter Card");
    assert_eq!(json["issuer"], "Inter");
    let id = json["id"].as_i64().unwrap();

    let response = app
        .oneshot(get(&format!("/api/accounts/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(db.list_accounts().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_account_requires_name() {
    let app = setup_test_app();

    let response = app
        .oneshot(post_json("/api/accounts", serde_json::json!({"name": "  "})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_account_not_found() {
    let app = setup_test_app();

    let response = app.oneshot(get("/api/accounts/999")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_json_is_bad_request() {
    let app = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/accounts")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_seeded_categories() {
    let app = setup_test_app();

    let response = app.oneshot(get("/api/categories")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let categories = json.as_array().unwrap();
    assert_eq!(categories.len(), 4);
    assert!(categories
        .iter()
        .any(|c| c["name"] == "Credit Card Bill" && c["kind"] == "card_bill"));
}

#[tokio::test]
async fn test_create_category_errors() {
    let app = setup_test_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/categories",
            serde_json::json!({"name": "Travel", "kind": "holiday"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(
            "/api/categories",
            serde_json::json!({"name": "Credit Card Bill", "kind": "card_bill"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// ========== Transaction Tests ==========

#[tokio::test]
async fn test_create_bill_transaction() {
    let db = setup_db();
    let category = db.get_category_by_name("Credit Card Bill").unwrap().unwrap();
    let app = create_router(db, test_config());

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/transactions",
            serde_json::json!({
                "account_id": null,
                "date": "2024-11-06",
                "description": "PAGAMENTO FATURA",
                "amount": "1000.00",
                "category_id": category.id
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["bill_state"], "open");
    assert_eq!(json["kind"], "expense");

    let response = app.oneshot(get("/api/transactions")).await.unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["limit"], 50);
}

#[tokio::test]
async fn test_create_transaction_unknown_category() {
    let app = setup_test_app();

    let response = app
        .oneshot(post_json(
            "/api/transactions",
            serde_json::json!({
                "account_id": null,
                "date": "2024-11-06",
                "description": "Something",
                "amount": "10.00",
                "category_id": 999
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_transactions_limit_is_clamped() {
    let app = setup_test_app();

    let response = app
        .oneshot(get("/api/transactions?limit=50000&offset=-4"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["limit"], MAX_PAGE_LIMIT);
    assert_eq!(json["offset"], 0);
}

// ========== Statement & Reconciliation Tests ==========

#[tokio::test]
async fn test_upload_statement_registers_pending_cycle() {
    let (app, _db, account_id) = setup_with_account();

    let response = app
        .clone()
        .oneshot(post_statement(account_id, NOVEMBER_STATEMENT))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["billing_cycle"], "2024-11");
    assert_eq!(json["new_lines"], 4);
    assert_eq!(json["status"], "pending");

    let response = app.oneshot(get("/api/cycles/pending")).await.unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["summary"]["total_cycles"], 1);
    assert_eq!(json["cycles"][0]["status"], "pending");
}

#[tokio::test]
async fn test_upload_malformed_statement() {
    let (app, _db, account_id) = setup_with_account();

    let response = app
        .oneshot(post_statement(account_id, "date,title\n2024-10-10,Mercado"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_statement_unknown_account() {
    let app = setup_test_app();

    let response = app
        .oneshot(post_statement(42, NOVEMBER_STATEMENT))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reconcile_auto_links_exact_match() {
    let (app, db, account_id) = setup_with_account();
    app.clone()
        .oneshot(post_statement(account_id, NOVEMBER_STATEMENT))
        .await
        .unwrap();
    let bill_id = add_bill(&db, nov(6), 100000);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/reconcile")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["summary"]["auto_linked"], 1);
    assert_eq!(json["auto_linked"][0]["bill_id"], bill_id);

    let response = app
        .clone()
        .oneshot(get("/api/cycles/linked"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["summary"]["total_cycles"], 1);
    assert_eq!(json["summary"]["mismatched"], 0);
    assert_eq!(json["cycles"][0]["link"]["bill_transaction_id"], bill_id);

    let response = app
        .oneshot(get(&format!("/api/transactions?bill_id={}", bill_id)))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["total"], 3);
}

#[tokio::test]
async fn test_link_requires_force_beyond_threshold() {
    let (app, db, account_id) = setup_with_account();
    app.clone()
        .oneshot(post_statement(account_id, NOVEMBER_STATEMENT))
        .await
        .unwrap();
    let bill_id = add_bill(&db, nov(6), 70000);

    let body = serde_json::json!({
        "account_id": account_id,
        "billing_cycle": "2024-11",
        "bill_id": bill_id
    });
    let response = app
        .clone()
        .oneshot(post_json("/api/cycles/link", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = get_body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("threshold"));

    let body = serde_json::json!({
        "account_id": account_id,
        "billing_cycle": "2024-11",
        "bill_id": bill_id,
        "force": true
    });
    let response = app
        .clone()
        .oneshot(post_json("/api/cycles/link", body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["forced"], true);
    assert_eq!(json["has_mismatch"], true);

    // Linking the same cycle again conflicts
    let response = app
        .oneshot(post_json("/api/cycles/link", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_link_unknown_cycle() {
    let (app, db, account_id) = setup_with_account();
    let bill_id = add_bill(&db, nov(6), 100000);

    let response = app
        .oneshot(post_json(
            "/api/cycles/link",
            serde_json::json!({
                "account_id": account_id,
                "billing_cycle": "2024-11",
                "bill_id": bill_id
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unlink_and_collapse() {
    let (app, db, account_id) = setup_with_account();
    app.clone()
        .oneshot(post_statement(account_id, NOVEMBER_STATEMENT))
        .await
        .unwrap();
    let bill_id = add_bill(&db, nov(6), 100000);

    let unlink = serde_json::json!({"account_id": account_id, "billing_cycle": "2024-11"});

    // Nothing linked yet
    let response = app
        .clone()
        .oneshot(post_json("/api/cycles/unlink", unlink.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/cycles/link",
            serde_json::json!({
                "account_id": account_id,
                "billing_cycle": "2024-11",
                "bill_id": bill_id
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(post_json("/api/cycles/unlink", unlink))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["transaction_id"], bill_id);
    assert_eq!(json["deleted_transaction_count"], 4);

    let bill = db.get_transaction(bill_id).unwrap().unwrap();
    assert_eq!(bill.amount, Decimal::new(100000, 2));
    assert!(!bill.is_hidden);

    // Already collapsed
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/bills/{}/collapse", bill_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_collapse_bill_by_id() {
    let (app, db, account_id) = setup_with_account();
    app.clone()
        .oneshot(post_statement(account_id, NOVEMBER_STATEMENT))
        .await
        .unwrap();
    let bill_id = add_bill(&db, nov(6), 100000);
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/reconcile")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/bills/{}/collapse", bill_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["billing_cycle"], "2024-11");

    let response = app.oneshot(get("/api/cycles/pending")).await.unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["cycles"][0]["status"], "pending");
}

#[tokio::test]
async fn test_collapse_missing_bill() {
    let app = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/bills/77/collapse")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_select_and_keep_pending() {
    let (app, db, account_id) = setup_with_account();
    app.clone()
        .oneshot(post_statement(account_id, NOVEMBER_STATEMENT))
        .await
        .unwrap();
    let first = add_bill(&db, nov(6), 100000);
    add_bill(&db, nov(8), 100000);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/reconcile")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["summary"]["requires_selection"], 1);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/cycles/{}/2024-11/candidates", account_id)))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);

    // Neither bill nor keep_pending
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/cycles/select",
            serde_json::json!({"account_id": account_id, "billing_cycle": "2024-11"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/cycles/select",
            serde_json::json!({
                "account_id": account_id,
                "billing_cycle": "2024-11",
                "keep_pending": true
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["outcome"], "kept_pending");
    assert_eq!(json["candidates"].as_array().unwrap().len(), 2);

    let response = app
        .oneshot(post_json(
            "/api/cycles/select",
            serde_json::json!({
                "account_id": account_id,
                "billing_cycle": "2024-11",
                "bill_id": first
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["outcome"], "linked");
    assert_eq!(json["bill_id"], first);
}

#[tokio::test]
async fn test_get_cycle_detail() {
    let (app, _db, account_id) = setup_with_account();
    app.clone()
        .oneshot(post_statement(account_id, NOVEMBER_STATEMENT))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!("/api/cycles/{}/2024-11", account_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["billing_cycle"], "2024-11");
    assert_eq!(json["lines"].as_array().unwrap().len(), 4);

    let response = app
        .oneshot(get(&format!("/api/cycles/{}/2023-01", account_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Preview & Import-and-Link Tests ==========

fn cycle_body(account_id: i64) -> serde_json::Value {
    serde_json::json!({
        "account_id": account_id,
        "billing_cycle": "2024-11",
        "lines": [
            {"date": "2024-10-10", "description": "Mercado", "amount": "600.00"},
            {"date": "2024-10-20", "description": "Posto", "amount": "400.00"},
            {"date": "2024-11-05", "description": "Pagamento recebido", "amount": "-1000.00",
             "is_payment_marker": true}
        ]
    })
}

#[tokio::test]
async fn test_preview_is_read_only() {
    let (app, db, account_id) = setup_with_account();
    let bill_id = add_bill(&db, nov(6), 100000);

    let response = app
        .oneshot(post_json(
            "/api/cycles/preview",
            serde_json::json!({"cycles": [cycle_body(account_id)]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["matches"][0]["decision"], "auto_link");
    assert_eq!(json["matches"][0]["suggested_bill_id"], bill_id);
    assert_eq!(json["unmatched_count"], 0);

    assert!(db.get_cycle(account_id, "2024-11").unwrap().is_none());
}

#[tokio::test]
async fn test_import_and_link() {
    let (app, db, account_id) = setup_with_account();
    let bill_id = add_bill(&db, nov(6), 100000);

    let response = app
        .oneshot(post_json(
            "/api/cycles/import",
            serde_json::json!({
                "cycles": [cycle_body(account_id)],
                "confirmed_matches": [
                    {"account_id": account_id, "billing_cycle": "2024-11", "bill_id": bill_id}
                ]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["imported_count"], 3);
    assert_eq!(json["matched_count"], 1);
    assert_eq!(json["zeroed_bills"][0]["bill_id"], bill_id);

    let bill = db.get_transaction(bill_id).unwrap().unwrap();
    assert!(bill.is_hidden);
    assert_eq!(bill.amount, Decimal::ZERO);
}

#[tokio::test]
async fn test_import_and_link_missing_bill_rolls_back() {
    let (app, db, account_id) = setup_with_account();

    let response = app
        .oneshot(post_json(
            "/api/cycles/import",
            serde_json::json!({
                "cycles": [cycle_body(account_id)],
                "confirmed_matches": [
                    {"account_id": account_id, "billing_cycle": "2024-11", "bill_id": 999}
                ]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(db.get_cycle(account_id, "2024-11").unwrap().is_none());
}

#[tokio::test]
async fn test_preview_flags_marker_by_description() {
    let (app, db, account_id) = setup_with_account();
    add_bill(&db, nov(6), 100000);

    let mut body = cycle_body(account_id);
    body["lines"][2]
        .as_object_mut()
        .unwrap()
        .remove("is_payment_marker");

    let response = app
        .oneshot(post_json(
            "/api/cycles/preview",
            serde_json::json!({"cycles": [body]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["total_amount"], "1000.00");
    assert_eq!(json["matches"][0]["transaction_count"], 2);
    assert_eq!(json["matches"][0]["candidates"][0]["confidence"], "exact");
}

#[tokio::test]
async fn test_oversized_line_amount_is_bad_request() {
    let (app, db, account_id) = setup_with_account();

    let mut body = cycle_body(account_id);
    body["lines"][0]["amount"] = serde_json::json!("10000000000000000000000000000");

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/cycles/preview",
            serde_json::json!({"cycles": [body.clone()]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(
            "/api/cycles/import",
            serde_json::json!({"cycles": [body]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(db.get_cycle(account_id, "2024-11").unwrap().is_none());
}

// ========== Integrity & Audit Tests ==========

#[tokio::test]
async fn test_integrity_clean() {
    let app = setup_test_app();

    let response = app.oneshot(get("/api/integrity")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["ok"], true);
    assert!(json["issues"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_audit_log_records_access() {
    let (app, db, _account_id) = setup_with_account();

    app.clone().oneshot(get("/api/accounts")).await.unwrap();

    let response = app.oneshot(get("/api/audit?limit=10")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let entries = json.as_array().unwrap();
    assert!(entries
        .iter()
        .any(|e| e["action"] == "list" && e["entity_type"] == "account"));
    assert!(db
        .list_audit_log(100)
        .unwrap()
        .iter()
        .all(|e| e.user_email == "local-dev"));
}

// ========== Error Mapping Tests ==========

#[test]
fn test_core_error_status_mapping() {
    use tally_core::Error;

    let cases = [
        (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
        (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
        (Error::Conflict("x".into()), StatusCode::CONFLICT),
        (
            Error::Unprocessable("x".into()),
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
        (
            Error::ToleranceExceeded {
                difference: Decimal::new(300, 0),
                difference_percent: Decimal::new(3000, 2),
                threshold_percent: Decimal::new(10, 0),
            },
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
        (
            Error::Integrity("x".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        (
            Error::Encryption("x".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (err, status) in cases {
        assert_eq!(AppError::from_core(err).status, status);
    }
}
