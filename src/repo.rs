use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<User>;
}

#[async_trait]
pub trait GroupRepo: Send + Sync {
    async fn create_group(&self, new: NewGroup) -> RepoResult<Group>;
    async fn get_group(&self, id: Id) -> RepoResult<Group>;
    async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group>;
    async fn list_groups(&self) -> RepoResult<Vec<Group>>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    /// All posts, newest first.
    async fn list_posts(&self) -> RepoResult<Vec<Post>>;
    async fn list_posts_by_group(&self, group_id: Id) -> RepoResult<Vec<Post>>;
    async fn list_posts_by_author(&self, author_id: Id) -> RepoResult<Vec<Post>>;
    /// Posts by every author the given user follows, newest first.
    async fn list_feed(&self, user_id: Id) -> RepoResult<Vec<Post>>;
    async fn count_posts_by_author(&self, author_id: Id) -> RepoResult<usize>;
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    async fn create_post(&self, new: NewPost) -> RepoResult<Post>;
    /// Rewrites the mutable field subset; `author_id` and `pub_date` are
    /// never touched.
    async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Comments under a post, oldest first.
    async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>>;
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
}

#[async_trait]
pub trait FollowRepo: Send + Sync {
    /// Idempotent: returns true if a new follow row was created.
    async fn follow(&self, user_id: Id, author_id: Id) -> RepoResult<bool>;
    /// Idempotent: returns true if a row was removed.
    async fn unfollow(&self, user_id: Id, author_id: Id) -> RepoResult<bool>;
    async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool>;
}

pub trait Repo: UserRepo + GroupRepo + PostRepo + CommentRepo + FollowRepo {}

impl<T> Repo for T where T: UserRepo + GroupRepo + PostRepo + CommentRepo + FollowRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        groups: HashMap<Id, Group>,
        posts: HashMap<Id, Post>,
        comments: HashMap<Id, Comment>,
        follows: HashMap<Id, Follow>,
        next_id: Id,
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn snapshot_path() -> PathBuf {
            match std::env::var("QUILL_DATA_DIR") {
                Ok(dir) => {
                    let mut p = PathBuf::from(dir);
                    p.push("state.json");
                    p
                }
                Err(_) => PathBuf::from(SNAPSHOT_PATH),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        log::info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        log::warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    log::warn!("failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }

        fn sort_newest_first(posts: &mut [Post]) {
            posts.sort_by(|a, b| b.pub_date.cmp(&a.pub_date).then(b.id.cmp(&a.id)));
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            if s.users.values().any(|u| u.username == new.username) {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let user = User { id, username: new.username, created_at: Utc::now() };
            s.users.insert(id, user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users
                .values()
                .find(|u| u.username == username)
                .cloned()
                .ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl GroupRepo for InMemRepo {
        async fn create_group(&self, new: NewGroup) -> RepoResult<Group> {
            let mut s = self.state.write().unwrap();
            if s.groups.values().any(|g| g.slug == new.slug) {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let group = Group { id, title: new.title, slug: new.slug, description: new.description };
            s.groups.insert(id, group.clone());
            drop(s);
            self.persist();
            Ok(group)
        }
        async fn get_group(&self, id: Id) -> RepoResult<Group> {
            let s = self.state.read().unwrap();
            s.groups.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group> {
            let s = self.state.read().unwrap();
            s.groups
                .values()
                .find(|g| g.slug == slug)
                .cloned()
                .ok_or(RepoError::NotFound)
        }
        async fn list_groups(&self) -> RepoResult<Vec<Group>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.groups.values().cloned().collect();
            v.sort_by_key(|g| g.id);
            Ok(v)
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn list_posts(&self) -> RepoResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.posts.values().cloned().collect();
            Self::sort_newest_first(&mut v);
            Ok(v)
        }
        async fn list_posts_by_group(&self, group_id: Id) -> RepoResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.posts.values().filter(|p| p.group_id == Some(group_id)).cloned().collect();
            Self::sort_newest_first(&mut v);
            Ok(v)
        }
        async fn list_posts_by_author(&self, author_id: Id) -> RepoResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.posts.values().filter(|p| p.author_id == author_id).cloned().collect();
            Self::sort_newest_first(&mut v);
            Ok(v)
        }
        async fn list_feed(&self, user_id: Id) -> RepoResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            let followed: std::collections::HashSet<Id> = s
                .follows
                .values()
                .filter(|f| f.user_id == user_id)
                .map(|f| f.author_id)
                .collect();
            let mut v: Vec<_> = s.posts.values().filter(|p| followed.contains(&p.author_id)).cloned().collect();
            Self::sort_newest_first(&mut v);
            Ok(v)
        }
        async fn count_posts_by_author(&self, author_id: Id) -> RepoResult<usize> {
            let s = self.state.read().unwrap();
            Ok(s.posts.values().filter(|p| p.author_id == author_id).count())
        }
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let s = self.state.read().unwrap();
            s.posts.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            let author = s.users.get(&new.author_id).ok_or(RepoError::NotFound)?.username.clone();
            if let Some(gid) = new.group_id {
                if !s.groups.contains_key(&gid) {
                    return Err(RepoError::NotFound);
                }
            }
            let id = Self::next_id(&mut s);
            let post = Post {
                id,
                text: new.text,
                pub_date: Utc::now(),
                author_id: new.author_id,
                author,
                group_id: new.group_id,
                image_hash: new.image_hash,
                image_mime: new.image_mime,
            };
            s.posts.insert(id, post.clone());
            drop(s);
            self.persist();
            Ok(post)
        }
        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            if let Some(gid) = upd.group_id {
                if !s.groups.contains_key(&gid) {
                    return Err(RepoError::NotFound);
                }
            }
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            post.text = upd.text;
            post.group_id = upd.group_id;
            post.image_hash = upd.image_hash;
            post.image_mime = upd.image_mime;
            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.comments.values().filter(|c| c.post_id == post_id).cloned().collect();
            v.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
            Ok(v)
        }
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&new.post_id) {
                return Err(RepoError::NotFound);
            }
            let author = s.users.get(&new.author_id).ok_or(RepoError::NotFound)?.username.clone();
            let id = Self::next_id(&mut s);
            let comment = Comment {
                id,
                post_id: new.post_id,
                author_id: new.author_id,
                author,
                text: new.text,
                created: Utc::now(),
            };
            s.comments.insert(id, comment.clone());
            drop(s);
            self.persist();
            Ok(comment)
        }
    }

    #[async_trait]
    impl FollowRepo for InMemRepo {
        async fn follow(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(&user_id) || !s.users.contains_key(&author_id) {
                return Err(RepoError::NotFound);
            }
            if s.follows.values().any(|f| f.user_id == user_id && f.author_id == author_id) {
                return Ok(false);
            }
            let id = Self::next_id(&mut s);
            s.follows.insert(id, Follow { id, user_id, author_id });
            drop(s);
            self.persist();
            Ok(true)
        }
        async fn unfollow(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            let mut s = self.state.write().unwrap();
            let existing: Vec<Id> = s
                .follows
                .values()
                .filter(|f| f.user_id == user_id && f.author_id == author_id)
                .map(|f| f.id)
                .collect();
            for id in &existing {
                s.follows.remove(id);
            }
            let removed = !existing.is_empty();
            drop(s);
            if removed {
                self.persist();
            }
            Ok(removed)
        }
        async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            let s = self.state.read().unwrap();
            Ok(s.follows.values().any(|f| f.user_id == user_id && f.author_id == author_id))
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    const POST_COLUMNS: &str = r#"
        p.id, p.text, p.pub_date, p.author_id, u.username AS author,
        p.group_id, p.image_hash, p.image_mime
    "#;

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        fn post_select(filter: &str) -> String {
            format!(
                "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.author_id \
                 {filter} ORDER BY p.pub_date DESC, p.id DESC"
            )
        }
    }

    fn internal(e: sqlx::Error) -> RepoError {
        RepoError::Internal(e.to_string())
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            sqlx::query_as::<_, User>(
                "INSERT INTO users (username) VALUES ($1) RETURNING id, username, created_at",
            )
            .bind(&new.username)
            .fetch_one(&self.pool)
            .await
            .map_err(|_| RepoError::Conflict)
        }
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            sqlx::query_as::<_, User>("SELECT id, username, created_at FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }
        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            sqlx::query_as::<_, User>("SELECT id, username, created_at FROM users WHERE username = $1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl GroupRepo for PgRepo {
        async fn create_group(&self, new: NewGroup) -> RepoResult<Group> {
            sqlx::query_as::<_, Group>(
                "INSERT INTO groups (title, slug, description) VALUES ($1, $2, $3) \
                 RETURNING id, title, slug, description",
            )
            .bind(&new.title)
            .bind(&new.slug)
            .bind(&new.description)
            .fetch_one(&self.pool)
            .await
            .map_err(|_| RepoError::Conflict)
        }
        async fn get_group(&self, id: Id) -> RepoResult<Group> {
            sqlx::query_as::<_, Group>("SELECT id, title, slug, description FROM groups WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }
        async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group> {
            sqlx::query_as::<_, Group>("SELECT id, title, slug, description FROM groups WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }
        async fn list_groups(&self) -> RepoResult<Vec<Group>> {
            sqlx::query_as::<_, Group>("SELECT id, title, slug, description FROM groups ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(internal)
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn list_posts(&self) -> RepoResult<Vec<Post>> {
            sqlx::query_as::<_, Post>(&Self::post_select(""))
                .fetch_all(&self.pool)
                .await
                .map_err(internal)
        }
        async fn list_posts_by_group(&self, group_id: Id) -> RepoResult<Vec<Post>> {
            sqlx::query_as::<_, Post>(&Self::post_select("WHERE p.group_id = $1"))
                .bind(group_id)
                .fetch_all(&self.pool)
                .await
                .map_err(internal)
        }
        async fn list_posts_by_author(&self, author_id: Id) -> RepoResult<Vec<Post>> {
            sqlx::query_as::<_, Post>(&Self::post_select("WHERE p.author_id = $1"))
                .bind(author_id)
                .fetch_all(&self.pool)
                .await
                .map_err(internal)
        }
        async fn list_feed(&self, user_id: Id) -> RepoResult<Vec<Post>> {
            sqlx::query_as::<_, Post>(&Self::post_select(
                "JOIN follows f ON f.author_id = p.author_id WHERE f.user_id = $1",
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }
        async fn count_posts_by_author(&self, author_id: Id) -> RepoResult<usize> {
            let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE author_id = $1")
                .bind(author_id)
                .fetch_one(&self.pool)
                .await
                .map_err(internal)?;
            Ok(n as usize)
        }
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            sqlx::query_as::<_, Post>(&Self::post_select("WHERE p.id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let id: Id = sqlx::query_scalar(
                "INSERT INTO posts (text, author_id, group_id, image_hash, image_mime) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
            )
            .bind(&new.text)
            .bind(new.author_id)
            .bind(new.group_id)
            .bind(&new.image_hash)
            .bind(&new.image_mime)
            .fetch_one(&self.pool)
            .await
            .map_err(|_| RepoError::NotFound)?;
            // re-select with the author join to populate the struct
            self.get_post(id).await
        }
        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let res = sqlx::query(
                "UPDATE posts SET text = $2, group_id = $3, image_hash = $4, image_mime = $5 \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(&upd.text)
            .bind(upd.group_id)
            .bind(&upd.image_hash)
            .bind(&upd.image_mime)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            self.get_post(id).await
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            sqlx::query_as::<_, Comment>(
                "SELECT c.id, c.post_id, c.author_id, u.username AS author, c.text, c.created \
                 FROM comments c JOIN users u ON u.id = c.author_id \
                 WHERE c.post_id = $1 ORDER BY c.created ASC, c.id ASC",
            )
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let id: Id = sqlx::query_scalar(
                "INSERT INTO comments (post_id, author_id, text) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(new.post_id)
            .bind(new.author_id)
            .bind(&new.text)
            .fetch_one(&self.pool)
            .await
            .map_err(|_| RepoError::NotFound)?;
            sqlx::query_as::<_, Comment>(
                "SELECT c.id, c.post_id, c.author_id, u.username AS author, c.text, c.created \
                 FROM comments c JOIN users u ON u.id = c.author_id WHERE c.id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)
        }
    }

    #[async_trait]
    impl FollowRepo for PgRepo {
        async fn follow(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            // unique (user_id, author_id) makes the insert idempotent
            let inserted: Option<Id> = sqlx::query_scalar(
                "INSERT INTO follows (user_id, author_id) VALUES ($1, $2) \
                 ON CONFLICT (user_id, author_id) DO NOTHING RETURNING id",
            )
            .bind(user_id)
            .bind(author_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|_| RepoError::NotFound)?;
            Ok(inserted.is_some())
        }
        async fn unfollow(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            let res = sqlx::query("DELETE FROM follows WHERE user_id = $1 AND author_id = $2")
                .bind(user_id)
                .bind(author_id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            Ok(res.rows_affected() > 0)
        }
        async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM follows WHERE user_id = $1 AND author_id = $2)",
            )
            .bind(user_id)
            .bind(author_id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)
        }
    }
}
