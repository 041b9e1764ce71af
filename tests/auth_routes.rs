#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use quill::cache::{PageCache, HOME_CACHE_TTL};
use quill::repo::inmem::InMemRepo;
use quill::routes::{config, AppState};
use quill::storage::FsImageStore;
use serial_test::serial;
use std::sync::Arc;

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::remove_var("QUILL_ADMIN_USERNAMES");
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("QUILL_DATA_DIR", tmp.path().to_str().unwrap());
    std::env::set_var("MEDIA_ROOT", tmp.path().to_str().unwrap());
}

fn app_state(repo: &InMemRepo) -> AppState {
    AppState {
        repo: Arc::new(repo.clone()),
        image_store: Arc::new(FsImageStore::new()),
        page_cache: PageCache::new(HOME_CACHE_TTL),
    }
}

#[actix_web::test]
#[serial]
async fn signup_login_and_me_flow() {
    setup_env();
    let repo = InMemRepo::new();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&repo)))
            .configure(config),
    )
    .await;

    // signup issues a usable token
    let req = test::TestRequest::post()
        .uri("/auth/signup")
        .set_json(serde_json::json!({ "username": "User" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let token = created["token"].as_str().unwrap().to_string();
    assert_eq!(created["user"]["username"], "User");

    // duplicate username conflicts
    let req = test::TestRequest::post()
        .uri("/auth/signup")
        .set_json(serde_json::json!({ "username": "User" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    // me
    let req = test::TestRequest::get()
        .uri("/auth/me")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let me: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(me["username"], "User");
    assert_eq!(me["role"], "user");

    // login for an existing user
    let req = test::TestRequest::post()
        .uri("/auth/login")
        .set_json(serde_json::json!({ "username": "User" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let logged: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(logged["token"].as_str().unwrap().len() > 10);

    // login for a missing user
    let req = test::TestRequest::post()
        .uri("/auth/login")
        .set_json(serde_json::json!({ "username": "nobody" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
#[serial]
async fn invalid_token_is_treated_as_anonymous() {
    setup_env();
    let repo = InMemRepo::new();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&repo)))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/create/")
        .insert_header(("Authorization", "Bearer notatoken"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    let location = resp.headers().get("Location").unwrap().to_str().unwrap();
    assert_eq!(location, "/auth/login?next=/create/");
}

#[actix_web::test]
#[serial]
async fn group_creation_is_admin_only() {
    setup_env();
    std::env::set_var("QUILL_ADMIN_USERNAMES", "boss");
    let repo = InMemRepo::new();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&repo)))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/auth/signup")
        .set_json(serde_json::json!({ "username": "boss" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let boss: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let boss_token = boss["token"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/auth/signup")
        .set_json(serde_json::json!({ "username": "pleb" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let pleb: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let pleb_token = pleb["token"].as_str().unwrap().to_string();

    // regular users may not create groups
    let req = test::TestRequest::post()
        .uri("/groups/")
        .insert_header(("Authorization", format!("Bearer {pleb_token}")))
        .set_json(serde_json::json!({ "title": "T", "slug": "t", "description": null }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    // the bootstrap admin may
    let req = test::TestRequest::post()
        .uri("/groups/")
        .insert_header(("Authorization", format!("Bearer {boss_token}")))
        .set_json(serde_json::json!({ "title": "T", "slug": "t", "description": null }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let group: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(group["slug"], "t");

    // duplicate slug conflicts
    let req = test::TestRequest::post()
        .uri("/groups/")
        .insert_header(("Authorization", format!("Bearer {boss_token}")))
        .set_json(serde_json::json!({ "title": "T2", "slug": "t", "description": null }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
}
