#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use quill::auth::{create_jwt, Role};
use quill::cache::{PageCache, HOME_CACHE_TTL};
use quill::models::{NewGroup, NewPost, NewUser};
use quill::repo::inmem::InMemRepo;
use quill::repo::{CommentRepo, GroupRepo, PostRepo, UserRepo};
use quill::routes::{config, AppState};
use quill::storage::FsImageStore;
use serial_test::serial;
use std::sync::Arc;

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
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

// 1x2 pixel GIF, enough for MIME sniffing to see image/gif
const GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x02, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xFF, 0xFF, 0xFF, 0x21, 0xF9, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00,
    0x00, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x0C, 0x0A, 0x00, 0x3B,
];

fn multipart_gif() -> (String, Vec<u8>) {
    let boundary = "BOUNDARYHASH";
    let mut body: Vec<u8> = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"pic.gif\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(GIF);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

#[actix_web::test]
#[serial]
async fn valid_submission_creates_post_with_group_and_image() {
    setup_env();
    let repo = InMemRepo::new();
    let author = repo.create_user(NewUser { username: "User".into() }).await.unwrap();
    let group = repo
        .create_group(NewGroup {
            title: "Тестовая группа".into(),
            slug: "test-slug".into(),
            description: Some("Описание группы".into()),
        })
        .await
        .unwrap();
    let token = create_jwt(author.id, &author.username, vec![Role::User]).unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&repo)))
            .configure(config),
    )
    .await;

    // upload the image first, then reference it from the form
    let (content_type, body) = multipart_gif();
    let req = test::TestRequest::post()
        .uri("/images")
        .insert_header(("Content-Type", content_type))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let uploaded: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let hash = uploaded["hash"].as_str().unwrap().to_string();
    assert_eq!(uploaded["mime"], "image/gif");

    let req = test::TestRequest::post()
        .uri("/create/")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(serde_json::json!({
            "text": "Тестовая запись",
            "group_id": group.id,
            "image_hash": hash,
            "image_mime": "image/gif"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    let location = resp.headers().get("Location").unwrap().to_str().unwrap();
    assert_eq!(location, "/profile/User/");

    // the newest post is the one just submitted, attributed to the submitter
    let latest = repo.list_posts().await.unwrap().remove(0);
    assert_eq!(latest.text, "Тестовая запись");
    assert_eq!(latest.author_id, author.id);
    assert_eq!(latest.group_id, Some(group.id));
    assert_eq!(latest.image_hash.as_deref(), Some(hash.as_str()));
}

#[actix_web::test]
#[serial]
async fn blank_text_rerenders_form_with_errors() {
    setup_env();
    let repo = InMemRepo::new();
    let author = repo.create_user(NewUser { username: "User".into() }).await.unwrap();
    let token = create_jwt(author.id, &author.username, vec![Role::User]).unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&repo)))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/create/")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(serde_json::json!({ "text": "   " }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(body["errors"]["text"].is_string());
    assert_eq!(body["is_edit"], false);

    assert!(repo.list_posts().await.unwrap().is_empty());
}

#[actix_web::test]
#[serial]
async fn unknown_group_choice_is_a_field_error_not_404() {
    setup_env();
    let repo = InMemRepo::new();
    let author = repo.create_user(NewUser { username: "User".into() }).await.unwrap();
    let token = create_jwt(author.id, &author.username, vec![Role::User]).unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&repo)))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/create/")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(serde_json::json!({ "text": "hello", "group_id": 999 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(body["errors"]["group"].is_string());
    assert!(repo.list_posts().await.unwrap().is_empty());
}

#[actix_web::test]
#[serial]
async fn author_edit_updates_text_and_group() {
    setup_env();
    let repo = InMemRepo::new();
    let author = repo.create_user(NewUser { username: "User".into() }).await.unwrap();
    let group = repo
        .create_group(NewGroup { title: "G".into(), slug: "g".into(), description: None })
        .await
        .unwrap();
    let post = repo
        .create_post(NewPost {
            author_id: author.id,
            text: "Тестовая запись".into(),
            group_id: None,
            image_hash: None,
            image_mime: None,
        })
        .await
        .unwrap();
    let token = create_jwt(author.id, &author.username, vec![Role::User]).unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&repo)))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri(&format!("/posts/{}/edit/", post.id))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(serde_json::json!({
            "text": "Другой текст поста",
            "group_id": group.id
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    let location = resp.headers().get("Location").unwrap().to_str().unwrap();
    assert_eq!(location, format!("/posts/{}/", post.id));

    let updated = repo.get_post(post.id).await.unwrap();
    assert_eq!(updated.text, "Другой текст поста");
    assert_eq!(updated.group_id, Some(group.id));
    assert_eq!(updated.pub_date, post.pub_date);
}

#[actix_web::test]
#[serial]
async fn non_author_edit_changes_nothing_and_redirects() {
    setup_env();
    let repo = InMemRepo::new();
    let author = repo.create_user(NewUser { username: "User".into() }).await.unwrap();
    let visitor = repo.create_user(NewUser { username: "Вася".into() }).await.unwrap();
    let post = repo
        .create_post(NewPost {
            author_id: author.id,
            text: "Тестовая запись".into(),
            group_id: None,
            image_hash: None,
            image_mime: None,
        })
        .await
        .unwrap();
    let token = create_jwt(visitor.id, &visitor.username, vec![Role::User]).unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&repo)))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri(&format!("/posts/{}/edit/", post.id))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(serde_json::json!({ "text": "hijacked" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    let location = resp.headers().get("Location").unwrap().to_str().unwrap();
    assert_eq!(location, format!("/posts/{}/", post.id));

    let unchanged = repo.get_post(post.id).await.unwrap();
    assert_eq!(unchanged.text, "Тестовая запись");
    assert_eq!(unchanged.author_id, author.id);
}

#[actix_web::test]
#[serial]
async fn valid_comment_is_created_and_redirects_to_detail() {
    setup_env();
    let repo = InMemRepo::new();
    let author = repo.create_user(NewUser { username: "User".into() }).await.unwrap();
    let post = repo
        .create_post(NewPost {
            author_id: author.id,
            text: "Тестовая запись".into(),
            group_id: None,
            image_hash: None,
            image_mime: None,
        })
        .await
        .unwrap();
    let token = create_jwt(author.id, &author.username, vec![Role::User]).unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&repo)))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri(&format!("/posts/{}/add_comment/", post.id))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(serde_json::json!({ "text": "Новый комментарий" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    let location = resp.headers().get("Location").unwrap().to_str().unwrap();
    assert_eq!(location, format!("/posts/{}/", post.id));

    let comments = repo.list_comments(post.id).await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].text, "Новый комментарий");
    assert_eq!(comments[0].author_id, author.id);
}

#[actix_web::test]
#[serial]
async fn invalid_comment_is_dropped_silently() {
    setup_env();
    let repo = InMemRepo::new();
    let author = repo.create_user(NewUser { username: "User".into() }).await.unwrap();
    let post = repo
        .create_post(NewPost {
            author_id: author.id,
            text: "Тестовая запись".into(),
            group_id: None,
            image_hash: None,
            image_mime: None,
        })
        .await
        .unwrap();
    let token = create_jwt(author.id, &author.username, vec![Role::User]).unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&repo)))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri(&format!("/posts/{}/add_comment/", post.id))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(serde_json::json!({ "text": "   " }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    // still a redirect: the invalid submission produces no feedback
    assert_eq!(resp.status(), 302);
    assert!(repo.list_comments(post.id).await.unwrap().is_empty());
}

#[actix_web::test]
#[serial]
async fn commenting_on_missing_post_is_404() {
    setup_env();
    let repo = InMemRepo::new();
    let author = repo.create_user(NewUser { username: "User".into() }).await.unwrap();
    let token = create_jwt(author.id, &author.username, vec![Role::User]).unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&repo)))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/posts/999/add_comment/")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(serde_json::json!({ "text": "lost" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}
