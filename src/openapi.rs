use crate::forms::{CommentForm, PostForm};
use crate::models::{Comment, Follow, Group, NewGroup, NewUser, Post, User};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::index,
        crate::routes::group_posts,
        crate::routes::profile,
        crate::routes::follow_index,
        crate::routes::post_detail,
        crate::routes::post_create_page,
        crate::routes::post_create,
        crate::routes::post_edit_page,
        crate::routes::post_edit,
        crate::routes::add_comment,
        crate::routes::profile_follow,
        crate::routes::profile_unfollow,
        crate::routes::create_group,
        crate::routes::signup,
        crate::routes::login,
        crate::routes::auth_me,
        crate::routes::upload_image,
    ),
    components(schemas(
        User, NewUser, Group, NewGroup, Post, Comment, Follow,
        PostForm, CommentForm,
        crate::routes::ImageUploadResponse, crate::routes::LoginRequest
    )),
    tags(
        (name = "posts", description = "Post listing, creation and editing"),
        (name = "comments", description = "Comment operations"),
        (name = "follows", description = "Author subscriptions"),
        (name = "auth", description = "Signup and token issuance"),
    )
)]
pub struct ApiDoc;
