use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::auth::{create_jwt, Auth, Role};
use crate::cache::PageCache;
use crate::error::ApiError;
use crate::forms::{CommentForm, PostForm};
use crate::models::*;
use crate::pagination::{paginate, Page};
use crate::repo::Repo;
use crate::storage::{ImageStore, ImageStoreError};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/group/{slug}/").route(web::get().to(group_posts)))
        .service(
            web::resource("/profile/{username}/follow/")
                .route(web::get().to(profile_follow))
                .route(web::post().to(profile_follow)),
        )
        .service(
            web::resource("/profile/{username}/unfollow/")
                .route(web::get().to(profile_unfollow))
                .route(web::post().to(profile_unfollow)),
        )
        .service(web::resource("/profile/{username}/").route(web::get().to(profile)))
        .service(
            web::resource("/create/")
                .route(web::get().to(post_create_page))
                .route(web::post().to(post_create)),
        )
        .service(
            web::resource("/posts/{id}/edit/")
                .route(web::get().to(post_edit_page))
                .route(web::post().to(post_edit)),
        )
        .service(web::resource("/posts/{id}/add_comment/").route(web::post().to(add_comment)))
        .service(web::resource("/posts/{id}/").route(web::get().to(post_detail)))
        .service(web::resource("/follow/").route(web::get().to(follow_index)))
        .service(web::resource("/groups/").route(web::post().to(create_group)))
        .service(web::resource("/auth/signup").route(web::post().to(signup)))
        .service(
            web::resource("/auth/login")
                .route(web::get().to(login_page))
                .route(web::post().to(login)),
        )
        .service(web::resource("/auth/me").route(web::get().to(auth_me)))
        .service(web::resource("/images").route(web::post().to(upload_image)))
        .route("/images/{hash}", web::get().to(get_image))
        // every unknown path gets the service's own 404 body
        .default_service(web::route().to(not_found));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub image_store: Arc<dyn ImageStore>,
    pub page_cache: PageCache,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    page: Option<String>,
}

fn redirect_to(location: String) -> HttpResponse {
    HttpResponse::Found()
        .insert_header(("Location", location))
        .finish()
}

fn post_detail_url(id: Id) -> String {
    format!("/posts/{id}/")
}

fn profile_url(username: &str) -> String {
    format!("/profile/{}/", urlencoding::encode(username))
}

async fn not_found() -> Result<HttpResponse, ApiError> {
    Err(ApiError::NotFound)
}

// ---------------- list pages -----------------------------------------

#[utoipa::path(
    get,
    path = "/",
    params(("page" = Option<String>, Query, description = "Page number, defaults to 1")),
    responses((status = 200, description = "Paginated post list, newest first; body cached for 20 s"))
)]
pub async fn index(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let cache_key = req.query_string().to_string();
    if let Some(body) = data.page_cache.get(&cache_key) {
        return Ok(HttpResponse::Ok().content_type("application/json").body(body));
    }
    let posts = data.repo.list_posts().await?;
    let page = paginate(posts, query.page.as_deref());
    let body = serde_json::to_vec(&page).map_err(|_| ApiError::Internal)?;
    data.page_cache.put(cache_key, body.clone());
    Ok(HttpResponse::Ok().content_type("application/json").body(body))
}

#[derive(Debug, serde::Serialize)]
pub struct GroupPage {
    pub group: Group,
    #[serde(flatten)]
    pub page: Page<Post>,
}

#[utoipa::path(
    get,
    path = "/group/{slug}/",
    params(
        ("slug" = String, Path, description = "Group slug"),
        ("page" = Option<String>, Query, description = "Page number")
    ),
    responses(
        (status = 200, description = "Group details plus its posts"),
        (status = 404, description = "Unknown slug")
    )
)]
pub async fn group_posts(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let group = data.repo.get_group_by_slug(&path.into_inner()).await?;
    let posts = data.repo.list_posts_by_group(group.id).await?;
    let page = paginate(posts, query.page.as_deref());
    Ok(HttpResponse::Ok().json(GroupPage { group, page }))
}

#[derive(Debug, serde::Serialize)]
pub struct ProfilePage {
    pub author: User,
    pub posts_count: usize,
    /// Present only for signed-in viewers.
    pub following: Option<bool>,
    #[serde(flatten)]
    pub page: Page<Post>,
}

#[utoipa::path(
    get,
    path = "/profile/{username}/",
    params(
        ("username" = String, Path, description = "Author username"),
        ("page" = Option<String>, Query, description = "Page number")
    ),
    responses(
        (status = 200, description = "Author details plus their posts"),
        (status = 404, description = "Unknown username")
    )
)]
pub async fn profile(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let author = data.repo.get_user_by_username(&path.into_inner()).await?;
    let posts = data.repo.list_posts_by_author(author.id).await?;
    let posts_count = data.repo.count_posts_by_author(author.id).await?;
    let following = match &auth {
        Some(a) => Some(data.repo.is_following(a.0.uid, author.id).await?),
        None => None,
    };
    let page = paginate(posts, query.page.as_deref());
    Ok(HttpResponse::Ok().json(ProfilePage { author, posts_count, following, page }))
}

#[utoipa::path(
    get,
    path = "/follow/",
    params(("page" = Option<String>, Query, description = "Page number")),
    responses(
        (status = 200, description = "Posts by followed authors"),
        (status = 302, description = "Anonymous: redirect to login")
    )
)]
pub async fn follow_index(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let posts = data.repo.list_feed(auth.0.uid).await?;
    let page = paginate(posts, query.page.as_deref());
    Ok(HttpResponse::Ok().json(page))
}

// ---------------- post detail ----------------------------------------

#[derive(Debug, serde::Serialize)]
pub struct PostDetail {
    pub post: Post,
    pub posts_count: usize,
    pub comments: Vec<Comment>,
}

#[utoipa::path(
    get,
    path = "/posts/{id}/",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post with comments and the author's post count"),
        (status = 404, description = "Unknown post")
    )
)]
pub async fn post_detail(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    let posts_count = data.repo.count_posts_by_author(post.author_id).await?;
    let comments = data.repo.list_comments(post.id).await?;
    Ok(HttpResponse::Ok().json(PostDetail { post, posts_count, comments }))
}

// ---------------- post create / edit ----------------------------------

/// The data a client needs to render the post form, plus any validation
/// errors from the previous submission.
#[derive(Debug, serde::Serialize)]
pub struct PostFormPage {
    pub form: PostForm,
    pub groups: Vec<Group>,
    pub errors: Option<crate::forms::FormErrors>,
    pub is_edit: bool,
}

impl PostFormPage {
    async fn render(
        data: &web::Data<AppState>,
        form: PostForm,
        errors: Option<crate::forms::FormErrors>,
        is_edit: bool,
    ) -> Result<HttpResponse, ApiError> {
        let groups = data.repo.list_groups().await?;
        Ok(HttpResponse::Ok().json(PostFormPage { form, groups, errors, is_edit }))
    }
}

#[utoipa::path(
    get,
    path = "/create/",
    responses(
        (status = 200, description = "Blank post form with group choices"),
        (status = 302, description = "Anonymous: redirect to login")
    )
)]
pub async fn post_create_page(
    _auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    PostFormPage::render(&data, PostForm::default(), None, false).await
}

/// Validates the submitted form against the group table as well: a group
/// id that does not resolve is a field error, not a 404.
async fn validate_post_form(
    data: &web::Data<AppState>,
    form: &PostForm,
) -> Result<crate::forms::FormErrors, ApiError> {
    let mut errors = form.validate();
    if let Some(gid) = form.group_id {
        if data.repo.get_group(gid).await.is_err() {
            errors.add("group", "select a valid choice");
        }
    }
    Ok(errors)
}

#[utoipa::path(
    post,
    path = "/create/",
    request_body = PostForm,
    responses(
        (status = 302, description = "Created: redirect to the author's profile"),
        (status = 200, description = "Validation failed: form re-rendered with errors")
    )
)]
pub async fn post_create(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<PostForm>,
) -> Result<HttpResponse, ApiError> {
    let form = payload.into_inner();
    let errors = validate_post_form(&data, &form).await?;
    if !errors.is_empty() {
        return PostFormPage::render(&data, form, Some(errors), false).await;
    }
    data.repo
        .create_post(NewPost {
            author_id: auth.0.uid,
            text: form.text,
            group_id: form.group_id,
            image_hash: form.image_hash,
            image_mime: form.image_mime,
        })
        .await?;
    Ok(redirect_to(profile_url(&auth.0.sub)))
}

#[utoipa::path(
    get,
    path = "/posts/{id}/edit/",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Pre-populated form (author only)"),
        (status = 302, description = "Non-author: redirect to the post detail page"),
        (status = 404, description = "Unknown post")
    )
)]
pub async fn post_edit_page(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    if auth.0.uid != post.author_id {
        return Ok(redirect_to(post_detail_url(post.id)));
    }
    let form = PostForm {
        text: post.text,
        group_id: post.group_id,
        image_hash: post.image_hash,
        image_mime: post.image_mime,
    };
    PostFormPage::render(&data, form, None, true).await
}

#[utoipa::path(
    post,
    path = "/posts/{id}/edit/",
    request_body = PostForm,
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 302, description = "Saved (author) or silently denied (non-author): redirect to detail"),
        (status = 200, description = "Validation failed: form re-rendered with errors"),
        (status = 404, description = "Unknown post")
    )
)]
pub async fn post_edit(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<PostForm>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    if auth.0.uid != post.author_id {
        // silent denial: no error surfaced, nothing changes
        return Ok(redirect_to(post_detail_url(post.id)));
    }
    let form = payload.into_inner();
    let errors = validate_post_form(&data, &form).await?;
    if !errors.is_empty() {
        return PostFormPage::render(&data, form, Some(errors), true).await;
    }
    let updated = data
        .repo
        .update_post(
            post.id,
            UpdatePost {
                text: form.text,
                group_id: form.group_id,
                image_hash: form.image_hash,
                image_mime: form.image_mime,
            },
        )
        .await?;
    Ok(redirect_to(post_detail_url(updated.id)))
}

// ---------------- comments --------------------------------------------

#[utoipa::path(
    post,
    path = "/posts/{id}/add_comment/",
    request_body = CommentForm,
    responses(
        (status = 302, description = "Redirect to the post detail page whether or not the comment was accepted"),
        (status = 404, description = "Unknown post")
    )
)]
pub async fn add_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<CommentForm>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    let form = payload.into_inner();
    // an invalid submission is dropped without feedback
    if form.validate().is_empty() {
        data.repo
            .create_comment(NewComment {
                post_id: post.id,
                author_id: auth.0.uid,
                text: form.text,
            })
            .await?;
    }
    Ok(redirect_to(post_detail_url(post.id)))
}

// ---------------- follow / unfollow ------------------------------------

#[utoipa::path(
    post,
    path = "/profile/{username}/follow/",
    params(("username" = String, Path, description = "Author to follow")),
    responses(
        (status = 302, description = "Redirect to the author's profile"),
        (status = 404, description = "Unknown username")
    )
)]
pub async fn profile_follow(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let author = data.repo.get_user_by_username(&path.into_inner()).await?;
    // self-follow is a no-op; a repeat follow hits the unique pair and is one too
    if author.id != auth.0.uid {
        data.repo.follow(auth.0.uid, author.id).await?;
    }
    Ok(redirect_to(profile_url(&author.username)))
}

#[utoipa::path(
    post,
    path = "/profile/{username}/unfollow/",
    params(("username" = String, Path, description = "Author to unfollow")),
    responses(
        (status = 302, description = "Redirect to the author's profile"),
        (status = 404, description = "Unknown username")
    )
)]
pub async fn profile_unfollow(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let author = data.repo.get_user_by_username(&path.into_inner()).await?;
    if author.id != auth.0.uid {
        data.repo.unfollow(auth.0.uid, author.id).await?;
    }
    Ok(redirect_to(profile_url(&author.username)))
}

// ---------------- groups (admin) ---------------------------------------

#[utoipa::path(
    post,
    path = "/groups/",
    request_body = NewGroup,
    responses(
        (status = 201, description = "Group created", body = Group),
        (status = 403, description = "Forbidden, admins only"),
        (status = 409, description = "Slug already taken")
    )
)]
pub async fn create_group(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewGroup>,
) -> Result<HttpResponse, ApiError> {
    if !auth.0.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let group = data.repo.create_group(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(group))
}

// ---------------- auth -------------------------------------------------

#[derive(Debug, serde::Serialize)]
struct TokenResponse {
    token: String,
    user: User,
}

fn is_bootstrap_admin(username: &str) -> bool {
    std::env::var("QUILL_ADMIN_USERNAMES")
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .any(|s| s.trim() == username)
}

fn roles_for(username: &str) -> Vec<Role> {
    if is_bootstrap_admin(username) {
        vec![Role::Admin, Role::User]
    } else {
        vec![Role::User]
    }
}

#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = NewUser,
    responses(
        (status = 201, description = "User created, token issued"),
        (status = 409, description = "Username taken")
    )
)]
pub async fn signup(
    data: web::Data<AppState>,
    payload: web::Json<NewUser>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    if new.username.trim().is_empty() {
        return Err(ApiError::BadRequest);
    }
    let user = data.repo.create_user(new).await?;
    let token = create_jwt(user.id, &user.username, roles_for(&user.username))
        .map_err(|_| ApiError::Internal)?;
    Ok(HttpResponse::Created().json(TokenResponse { token, user }))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    username: String,
}

pub async fn login_page() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "detail": "login required",
        "hint": "POST a username here to receive a bearer token"
    }))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued"),
        (status = 404, description = "Unknown username")
    )
)]
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user_by_username(&payload.username).await?;
    let token = create_jwt(user.id, &user.username, roles_for(&user.username))
        .map_err(|_| ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(TokenResponse { token, user }))
}

#[derive(Debug, serde::Serialize)]
struct MeResponse {
    id: Id,
    username: String,
    role: String,
}

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user info"),
        (status = 302, description = "Anonymous: redirect to login")
    )
)]
pub async fn auth_me(auth: Auth) -> Result<HttpResponse, ApiError> {
    let role = if auth.0.is_admin() { "admin" } else { "user" };
    let me = MeResponse {
        id: auth.0.uid,
        username: auth.0.sub.clone(),
        role: role.to_string(),
    };
    Ok(HttpResponse::Ok().json(me))
}

// ---------------- images -----------------------------------------------

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ImageUploadResponse {
    pub hash: String,
    pub mime: String,
    pub size: usize,
    pub duplicate: bool,
}

const IMAGE_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

#[utoipa::path(
    post,
    path = "/images",
    responses(
        (status = 201, description = "Image stored (new)", body = ImageUploadResponse),
        (status = 200, description = "Image already existed (idempotent)", body = ImageUploadResponse),
        (status = 415, description = "Unsupported media type"),
        (status = 413, description = "Payload too large")
    )
)]
pub async fn upload_image(
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    use actix_web::http::StatusCode;
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        match field.content_disposition().get_name() {
            Some("image") => {}
            _ => continue,
        }
        let mut field_stream = field;
        let mut hasher = Sha256::new();
        while let Some(chunk) = field_stream.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > IMAGE_SIZE_LIMIT {
                return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish());
            }
            hasher.update(&chunk);
            bytes.extend_from_slice(&chunk);
        }
        let hash = format!("{:x}", hasher.finalize());
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        if !ALLOWED_MIME.contains(&mime.as_str()) {
            return Ok(HttpResponse::UnsupportedMediaType().finish());
        }
        let (status_code, duplicate) = match data.image_store.save(&hash, &mime, &bytes).await {
            Ok(()) => (StatusCode::CREATED, false),
            Err(ImageStoreError::Duplicate) => (StatusCode::OK, true),
            Err(e) => {
                log::error!("image_store save error: {e}");
                return Err(ApiError::Internal);
            }
        };
        let resp = ImageUploadResponse { hash, mime, size: bytes.len(), duplicate };
        return Ok(HttpResponse::build(status_code).json(resp));
    }
    Ok(HttpResponse::BadRequest().finish())
}

pub async fn get_image(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let hash = path.into_inner();
    if hash.len() < 2 {
        return Err(ApiError::NotFound);
    }
    match data.image_store.load(&hash).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok()
            .insert_header(("Content-Type", mime))
            .body(bytes)),
        Err(ImageStoreError::NotFound) => Err(ApiError::NotFound),
        Err(e) => {
            log::error!("image_store load error: {e}");
            Err(ApiError::Internal)
        }
    }
}
