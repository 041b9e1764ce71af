use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct User {
    pub id: Id,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    pub username: String,
}

/// A named category posts can optionally belong to. Created by admins only.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Group {
    pub id: Id,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewGroup {
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
}

/// A user-authored entry. `author` carries the username so list pages can
/// render attribution without a second lookup; the Postgres backend fills
/// it with a join.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Post {
    pub id: Id,
    pub text: String,
    pub pub_date: DateTime<Utc>,
    pub author_id: Id,
    pub author: String,
    pub group_id: Option<Id>,
    pub image_hash: Option<String>,
    pub image_mime: Option<String>,
}

/// Repo-level insert payload. `author_id` always comes from the verified
/// claims, never from the request body.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: Id,
    pub text: String,
    pub group_id: Option<Id>,
    pub image_hash: Option<String>,
    pub image_mime: Option<String>,
}

/// Field subset an author may change. `pub_date` and `author_id` are fixed
/// at creation.
#[derive(Debug, Clone)]
pub struct UpdatePost {
    pub text: String,
    pub group_id: Option<Id>,
    pub image_hash: Option<String>,
    pub image_mime: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Comment {
    pub id: Id,
    pub post_id: Id,
    pub author_id: Id,
    pub author: String,
    pub text: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: Id,
    pub author_id: Id,
    pub text: String,
}

/// Directed subscription: `user_id` follows `author_id`. The pair is
/// unique; a second follow of the same author is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Follow {
    pub id: Id,
    pub user_id: Id,
    pub author_id: Id,
}
