mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use car_classifieds::database::queries::CarQueries;
use common::{
    empty_request, get, json_request, listing_fields, multipart_request, Part, TestApp, JPEG,
};
use serde_json::json;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use wiremock::{
    matchers::{header as header_matcher, method, path},
    Mock, MockServer, ResponseTemplate,
};

const GENERATE_PATH: &str = "/v1beta/models/test-model:generateContent";

fn model_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] } }]
    }))
}

async fn create_listing(app: &TestApp, token: &str) -> serde_json::Value {
    let mut parts = listing_fields();
    parts.push(Part::File {
        field: "images",
        file_name: "front.jpg",
        content_type: "image/jpeg",
        data: JPEG,
    });
    let (status, body) = app
        .send_json(multipart_request("/listings", Some(token), &parts))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["data"].clone()
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new().await;
    let (status, body) = app.send_json(get("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_register_sets_session_cookie() {
    let app = TestApp::new().await;
    let request = json_request(
        "POST",
        "/auth/register",
        None,
        json!({
            "username": "ruta",
            "email": "ruta@example.com",
            "password": "sunny2024",
            "location": "Kaunas"
        }),
    );
    let (status, headers, _) = app.send(request).await;
    assert_eq!(status, StatusCode::CREATED);

    let cookie = headers
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("session="));
    assert!(cookie.contains("HttpOnly"));

    let pair = cookie.split(';').next().unwrap();
    let me = Request::builder()
        .uri("/auth/me")
        .header(header::COOKIE, pair)
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send_json(me).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["username"], "ruta");
    assert_eq!(body["data"]["user"]["location"], "Kaunas");
    assert!(body["data"]["user"].get("password_hash").is_none());
    assert_eq!(body["data"]["ai_quota"]["remaining"], 2);
}

#[tokio::test]
async fn test_login_by_email_and_wrong_password() {
    let app = TestApp::new().await;
    let register = json_request(
        "POST",
        "/auth/register",
        None,
        json!({ "username": "ruta", "email": "ruta@example.com", "password": "sunny2024" }),
    );
    assert_eq!(app.send(register).await.0, StatusCode::CREATED);

    let (status, body) = app
        .send_json(json_request(
            "POST",
            "/auth/login",
            None,
            json!({ "login": "ruta@example.com", "password": "sunny2024" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["token"].as_str().is_some());

    let (status, body) = app
        .send_json(json_request(
            "POST",
            "/auth/login",
            None,
            json!({ "login": "ruta", "password": "wrong-pass1" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid username or password");
}

#[tokio::test]
async fn test_weak_password_is_rejected() {
    let app = TestApp::new().await;
    let (status, _) = app
        .send_json(json_request(
            "POST",
            "/auth/register",
            None,
            json!({ "username": "ruta", "email": "ruta@example.com", "password": "short" }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_listing_requires_login() {
    let app = TestApp::new().await;
    let (status, _) = app
        .send_json(multipart_request("/listings", None, &listing_fields()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_listing_without_images_is_rejected() {
    let app = TestApp::new().await;
    let (_, token) = app.user("seller").await;

    let (status, _) = app
        .send_json(multipart_request("/listings", Some(&token), &listing_fields()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(CarQueries::all(app.state.database.pool()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_listing_rejects_non_image_upload() {
    let app = TestApp::new().await;
    let (_, token) = app.user("seller").await;

    let mut parts = listing_fields();
    parts.push(Part::File {
        field: "images",
        file_name: "notes.jpg",
        content_type: "image/jpeg",
        data: b"definitely not a photo",
    });
    let (status, _) = app
        .send_json(multipart_request("/listings", Some(&token), &parts))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(CarQueries::all(app.state.database.pool()).await.unwrap().is_empty());
    assert_eq!(std::fs::read_dir(app.upload_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_create_and_view_listing() {
    let app = TestApp::new().await;
    let (seller, token) = app.user("seller").await;

    let created = create_listing(&app, &token).await;
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["user_id"], seller.id);
    assert_eq!(created["views"], 0);

    let image = created["images"][0].as_str().unwrap().to_string();
    assert!(image.starts_with("/static/uploads/"));
    let key = image.trim_start_matches("/static/uploads/");
    assert!(app.upload_dir().join(key).exists());

    let (status, _, body) = app.send(get(&image, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, JPEG);

    let (status, body) = app.send_json(get(&format!("/listings/{}", id), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["views"], 1);
    assert_eq!(body["data"]["owner"]["username"], "seller");

    let (_, body) = app.send_json(get(&format!("/listings/{}", id), None)).await;
    assert_eq!(body["data"]["views"], 2);

    let (status, body) = app.send_json(get("/listings?make=toyota", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = app.send_json(get("/users/me/listings", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], id);
}

#[tokio::test]
async fn test_missing_listing_is_not_found() {
    let app = TestApp::new().await;
    let (status, _) = app.send_json(get("/listings/999", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_only_owner_may_update() {
    let app = TestApp::new().await;
    let (_admin, _) = app.user("admin").await;
    let (_, owner) = app.user("owner").await;
    let (_, stranger) = app.user("stranger").await;

    let id = create_listing(&app, &owner).await["id"].as_i64().unwrap();
    let uri = format!("/listings/{}", id);

    let (status, _) = app
        .send_json(json_request("PUT", &uri, Some(&stranger), json!({ "price": 1 })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send_json(json_request("PUT", &uri, Some(&owner), json!({ "price": 8900 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["price"], 8900);
}

#[tokio::test]
async fn test_delete_is_refused_for_strangers_and_allowed_for_admin() {
    let app = TestApp::new().await;
    let (admin, admin_token) = app.user("admin").await;
    let (_, owner) = app.user("owner").await;
    let (_, stranger) = app.user("stranger").await;
    assert_eq!(admin.id, 1);

    let created = create_listing(&app, &owner).await;
    let id = created["id"].as_i64().unwrap();
    let key = created["images"][0]
        .as_str()
        .unwrap()
        .trim_start_matches("/static/uploads/")
        .to_string();
    let uri = format!("/listings/{}", id);

    let (status, body) = app.send_json(empty_request("DELETE", &uri, Some(&stranger))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], false);
    assert!(CarQueries::find_by_id(app.state.database.pool(), id)
        .await
        .unwrap()
        .is_some());
    assert!(app.upload_dir().join(&key).exists());

    let (status, body) = app.send_json(empty_request("DELETE", &uri, Some(&admin_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);
    assert_eq!(body["files_removed"], 1);
    assert!(CarQueries::find_by_id(app.state.database.pool(), id)
        .await
        .unwrap()
        .is_none());
    assert!(!app.upload_dir().join(&key).exists());
}

#[tokio::test]
async fn test_favorite_toggle() {
    let app = TestApp::new().await;
    let (_, owner) = app.user("owner").await;
    let (_, fan) = app.user("fan").await;
    let id = create_listing(&app, &owner).await["id"].as_i64().unwrap();
    let uri = format!("/listings/{}/favorite", id);

    let (status, body) = app.send_json(empty_request("POST", &uri, Some(&fan))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["favorited"], true);

    let (_, body) = app.send_json(get("/users/me/favorites", Some(&fan))).await;
    assert_eq!(body["data"][0]["id"], id);

    let (_, body) = app.send_json(empty_request("POST", &uri, Some(&fan))).await;
    assert_eq!(body["favorited"], false);

    let (_, body) = app.send_json(get("/users/me/favorites", Some(&fan))).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = app
        .send_json(empty_request("POST", "/listings/999/favorite", Some(&fan)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_export_requires_admin() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("admin").await;
    let (_, seller) = app.user("seller").await;
    create_listing(&app, &seller).await;

    let (status, _) = app.send_json(get("/admin/export", Some(&seller))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.send_json(get("/admin/export", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["users"].as_array().unwrap().len(), 2);
    assert_eq!(body["cars"].as_array().unwrap().len(), 1);
    assert_eq!(body["images"].as_array().unwrap().len(), 1);
    assert!(body["users"][0].get("password_hash").is_none());
}

#[tokio::test]
async fn test_admin_database_download_is_gzip() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("admin").await;

    let (status, headers, body) = app.send(get("/admin/database", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/gzip");
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .starts_with("attachment;"));
    assert_eq!(&body[..2], &[0x1f, 0x8b]);
}

#[tokio::test]
async fn test_describe_consumes_daily_quota() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header_matcher("x-goog-api-key", "test-key"))
        .respond_with(model_reply("A dependable family hatchback."))
        .mount(&server)
        .await;

    let app = TestApp::with_ai(&server.uri(), "test-key").await;
    let (_, token) = app.user("writer").await;
    let body = json!({ "make": "Toyota", "model": "Corolla", "year": 2015 });

    for remaining in [1, 0] {
        let (status, reply) = app
            .send_json(json_request("POST", "/ai/describe", Some(&token), body.clone()))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", reply);
        assert_eq!(reply["data"]["description"], "A dependable family hatchback.");
        assert_eq!(reply["quota"]["remaining"], remaining);
    }

    let (status, _) = app
        .send_json(json_request("POST", "/ai/describe", Some(&token), body))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (_, quota) = app.send_json(get("/ai/quota", Some(&token))).await;
    assert_eq!(quota["data"]["used"], 2);
}

#[tokio::test]
async fn test_analyze_image_accepts_fenced_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(model_reply(
            "```json\n{\"make\": \"Toyota\", \"model\": \"Corolla\", \"year\": 2015, \"label\": \"\"}\n```",
        ))
        .mount(&server)
        .await;

    let app = TestApp::with_ai(&server.uri(), "test-key").await;
    let (_, token) = app.user("curious").await;

    let parts = [Part::File {
        field: "image",
        file_name: "car.jpg",
        content_type: "image/jpeg",
        data: JPEG,
    }];
    let (status, body) = app
        .send_json(multipart_request("/ai/analyze-image", Some(&token), &parts))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["make"], "Toyota");
    assert_eq!(body["data"]["year"], 2015);
    assert_eq!(body["data"]["label"], "2015 Toyota Corolla");
}

#[tokio::test]
async fn test_upstream_failure_is_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let app = TestApp::with_ai(&server.uri(), "test-key").await;
    let (_, token) = app.user("writer").await;

    let (status, _) = app
        .send_json(json_request(
            "POST",
            "/ai/describe",
            Some(&token),
            json!({ "make": "Audi", "model": "A4", "year": 2010 }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_unconfigured_ai_is_bad_gateway_without_using_quota() {
    let app = TestApp::new().await;
    let (_, token) = app.user("writer").await;

    let (status, _) = app
        .send_json(json_request(
            "POST",
            "/ai/describe",
            Some(&token),
            json!({ "make": "Audi", "model": "A4", "year": 2010 }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (_, quota) = app.send_json(get("/ai/quota", Some(&token))).await;
    assert_eq!(quota["data"]["used"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new().await;
    app.send(get("/health", None)).await;

    let (status, _, body) = app.send(get("/metrics", None)).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("http_responses_total"));
}

#[tokio::test]
async fn test_slow_ai_service_times_out_as_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(model_reply("Too late.").set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    // The test config gives the AI client a two second timeout.
    let app = TestApp::with_ai(&server.uri(), "test-key").await;
    let (_, token) = app.user("writer").await;

    let started = Instant::now();
    let (status, body) = app
        .send_json(json_request(
            "POST",
            "/ai/describe",
            Some(&token),
            json!({ "make": "Audi", "model": "A4", "year": 2010 }),
        ))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "AI service timed out");
    assert!(elapsed < Duration::from_secs(6), "took {:?}", elapsed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deletes_and_toggles_alongside_concurrent_views() {
    let app = TestApp::new().await;
    let (_, owner) = app.user("owner").await;
    let (_, fan) = app.user("fan").await;

    let watched = create_listing(&app, &owner).await["id"].as_i64().unwrap();
    let mut doomed = Vec::new();
    for _ in 0..5 {
        doomed.push(create_listing(&app, &owner).await["id"].as_i64().unwrap());
    }

    let done = Arc::new(AtomicBool::new(false));
    let viewer = {
        let db = app.state.database.clone();
        let done = done.clone();
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                assert!(CarQueries::increment_views(db.pool(), watched).await.unwrap());
                tokio::task::yield_now().await;
            }
        })
    };

    let favorite = format!("/listings/{}/favorite", watched);
    for round in 0..10 {
        let (status, body) = app.send_json(empty_request("POST", &favorite, Some(&fan))).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["favorited"], round % 2 == 0);
    }
    for id in &doomed {
        let uri = format!("/listings/{}", id);
        let (status, body) = app.send_json(empty_request("DELETE", &uri, Some(&owner))).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["deleted"], true);
    }

    done.store(true, Ordering::SeqCst);
    viewer.await.unwrap();

    let remaining = CarQueries::all(app.state.database.pool()).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, watched);
}

#[tokio::test]
async fn test_valuation_is_stored_and_shown_on_listing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(model_reply(
            "```json\n{\"min_price\": 8500, \"max_price\": 10200, \"currency\": \"EUR\", \"summary\": \"Fair ask.\"}\n```",
        ))
        .mount(&server)
        .await;

    let app = TestApp::with_ai(&server.uri(), "test-key").await;
    let (_, owner) = app.user("owner").await;
    let (_, stranger) = app.user("stranger").await;
    let id = create_listing(&app, &owner).await["id"].as_i64().unwrap();
    let uri = format!("/listings/{}/valuation", id);

    let (status, _) = app.send_json(empty_request("POST", &uri, Some(&stranger))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.send_json(empty_request("POST", &uri, Some(&owner))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["max_price"], 10200);
    assert_eq!(body["quota"]["used"], 1);

    let (_, body) = app.send_json(get(&format!("/listings/{}", id), None)).await;
    assert_eq!(body["data"]["valuation"]["min_price"], 8500);
    assert_eq!(body["data"]["valuation"]["currency"], "EUR");
}
