use crate::models::{
    Author, IdentityRecord, Newsletter, Post, PostAuthorRow, PostWithAuthor, Role, Stats, User,
    UserCredentials, UserWithRole,
};
use crate::validation::ValidPost;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

/// RepositoryError
///
/// Persistence failures as seen by handlers. Unique-key violations are split out so
/// they can be answered with 409 instead of a generic 500.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return RepositoryError::UniqueViolation(db_err.message().to_string());
            }
        }
        RepositoryError::Database(err.to_string())
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// NewUser
///
/// Insert payload for a user whose password has already been hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub hashed_password: String,
}

/// UserChanges
///
/// Partial update for a user. `None` leaves a column untouched; `role_id: Some`
/// replaces the user's role assignment.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub hashed_password: Option<String>,
    pub role_id: Option<i32>,
}

/// Repository Trait
///
/// Defines the abstract contract for all persistence operations, so handlers and the
/// authorization gate never see the concrete store.
///
/// **Send + Sync + async_trait** are required to make the trait object (`Arc<dyn Repository>`)
/// shareable across Axum's asynchronous task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Identity (authorization gate) ---
    /// Point read of a user and their current role. `None` if the user is gone.
    async fn get_identity(&self, user_id: i32) -> RepoResult<Option<IdentityRecord>>;

    // --- Users ---
    async fn get_user(&self, id: i32) -> RepoResult<Option<User>>;
    async fn get_user_with_role(&self, id: i32) -> RepoResult<Option<UserWithRole>>;
    async fn list_users(&self) -> RepoResult<Vec<UserWithRole>>;
    async fn find_credentials(&self, email: &str) -> RepoResult<Option<UserCredentials>>;
    async fn email_exists(&self, email: &str) -> RepoResult<bool>;
    /// Inserts the user and its role assignment atomically.
    async fn create_user(&self, user: NewUser, role_id: i32) -> RepoResult<User>;
    /// Applies the changes atomically. `None` if the user does not exist.
    async fn update_user(&self, id: i32, changes: UserChanges) -> RepoResult<Option<UserWithRole>>;

    // --- Roles ---
    async fn list_roles(&self) -> RepoResult<Vec<Role>>;

    // --- Blog ---
    async fn list_posts(&self) -> RepoResult<Vec<PostWithAuthor>>;
    async fn get_post(&self, id: i32) -> RepoResult<Option<PostWithAuthor>>;
    async fn get_post_record(&self, id: i32) -> RepoResult<Option<Post>>;
    async fn create_post(&self, author_id: i32, post: ValidPost) -> RepoResult<Post>;
    async fn update_post(&self, id: i32, post: ValidPost) -> RepoResult<Option<Post>>;

    // --- Authors ---
    async fn list_authors(&self) -> RepoResult<Vec<Author>>;
    async fn get_author(&self, id: i32) -> RepoResult<Option<Author>>;
    async fn get_author_by_user(&self, user_id: i32) -> RepoResult<Option<Author>>;

    // --- Newsletter ---
    /// Fails with `UniqueViolation` when the email is already subscribed.
    async fn subscribe_newsletter(&self, email: &str) -> RepoResult<Newsletter>;
    async fn list_newsletters(&self) -> RepoResult<Vec<Newsletter>>;

    // --- Stats ---
    async fn get_stats(&self) -> RepoResult<Stats>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// A user may hold several rows in `users_roles`; the highest one is authoritative.
const USER_WITH_ROLE_SELECT: &str = r#"
    SELECT u.id, u.name, u.email,
           (SELECT MAX(ur.role_id) FROM users_roles ur WHERE ur.user_id = u.id) AS role_id,
           u.created_at, u.updated_at
    FROM users u
"#;

const POST_WITH_AUTHOR_SELECT: &str = r#"
    SELECT p.id, p.title, p.description, p.content, p.image, p.created_at, p.updated_at,
           a.id AS author_id, u.name AS author_name, a.description AS author_description
    FROM posts p
    LEFT JOIN authors a ON p.author_id = a.id
    LEFT JOIN users u ON a.user_id = u.id
"#;

const POST_COLUMNS: &str =
    "id, title, description, author_id, image, content, created_at, updated_at";

const AUTHOR_COLUMNS: &str = "id, description, network, user_id, created_at, updated_at";

#[async_trait]
impl Repository for PostgresRepository {
    /// get_identity
    ///
    /// Re-read on every authenticated request so role changes apply immediately.
    async fn get_identity(&self, user_id: i32) -> RepoResult<Option<IdentityRecord>> {
        let identity = sqlx::query_as::<_, IdentityRecord>(
            r#"
            SELECT u.id, u.email,
                   (SELECT MAX(ur.role_id) FROM users_roles ur WHERE ur.user_id = u.id) AS role_id
            FROM users u
            WHERE u.id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    async fn get_user(&self, id: i32) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, email, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_with_role(&self, id: i32) -> RepoResult<Option<UserWithRole>> {
        let query = format!("{USER_WITH_ROLE_SELECT} WHERE u.id = $1");
        let user = sqlx::query_as::<_, UserWithRole>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn list_users(&self) -> RepoResult<Vec<UserWithRole>> {
        let query = format!("{USER_WITH_ROLE_SELECT} ORDER BY u.id");
        let users = sqlx::query_as::<_, UserWithRole>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn find_credentials(&self, email: &str) -> RepoResult<Option<UserCredentials>> {
        let credentials = sqlx::query_as::<_, UserCredentials>(
            r#"
            SELECT u.id, u.name, u.email, u.hashed_password,
                   (SELECT MAX(ur.role_id) FROM users_roles ur WHERE ur.user_id = u.id) AS role_id
            FROM users u
            WHERE u.email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credentials)
    }

    async fn email_exists(&self, email: &str) -> RepoResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    /// create_user
    ///
    /// Inserts the user row and its role assignment in one transaction.
    async fn create_user(&self, user: NewUser, role_id: i32) -> RepoResult<User> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, hashed_password)
            VALUES ($1, $2, $3)
            RETURNING id, name, email, created_at, updated_at
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.hashed_password)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO users_roles (user_id, role_id) VALUES ($1, $2)")
            .bind(created.id)
            .bind(role_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(created)
    }

    /// update_user
    ///
    /// Uses `COALESCE` for the optional columns. A role change replaces every
    /// existing assignment so the user ends up with exactly one role.
    async fn update_user(&self, id: i32, changes: UserChanges) -> RepoResult<Option<UserWithRole>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                email = COALESCE($3, email),
                hashed_password = COALESCE($4, hashed_password),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(changes.name)
        .bind(changes.email)
        .bind(changes.hashed_password)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        if let Some(role_id) = changes.role_id {
            sqlx::query("DELETE FROM users_roles WHERE user_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO users_roles (user_id, role_id) VALUES ($1, $2)")
                .bind(id)
                .bind(role_id)
                .execute(&mut *tx)
                .await?;
        }

        let query = format!("{USER_WITH_ROLE_SELECT} WHERE u.id = $1");
        let user = sqlx::query_as::<_, UserWithRole>(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(user)
    }

    async fn list_roles(&self) -> RepoResult<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>("SELECT id, name, description FROM roles ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }

    async fn list_posts(&self) -> RepoResult<Vec<PostWithAuthor>> {
        let query = format!("{POST_WITH_AUTHOR_SELECT} ORDER BY p.created_at DESC");
        let rows = sqlx::query_as::<_, PostAuthorRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(PostWithAuthor::from).collect())
    }

    async fn get_post(&self, id: i32) -> RepoResult<Option<PostWithAuthor>> {
        let query = format!("{POST_WITH_AUTHOR_SELECT} WHERE p.id = $1");
        let row = sqlx::query_as::<_, PostAuthorRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(PostWithAuthor::from))
    }

    async fn get_post_record(&self, id: i32) -> RepoResult<Option<Post>> {
        let query = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
        let post = sqlx::query_as::<_, Post>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(post)
    }

    async fn create_post(&self, author_id: i32, post: ValidPost) -> RepoResult<Post> {
        let query = format!(
            "INSERT INTO posts (title, description, content, image, author_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {POST_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Post>(&query)
            .bind(post.title)
            .bind(post.description)
            .bind(post.content)
            .bind(post.image)
            .bind(author_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn update_post(&self, id: i32, post: ValidPost) -> RepoResult<Option<Post>> {
        let query = format!(
            "UPDATE posts SET title = $2, description = $3, content = $4, image = $5, \
             updated_at = NOW() WHERE id = $1 RETURNING {POST_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, Post>(&query)
            .bind(id)
            .bind(post.title)
            .bind(post.description)
            .bind(post.content)
            .bind(post.image)
            .fetch_optional(&self.pool)
            .await?;
        Ok(updated)
    }

    async fn list_authors(&self) -> RepoResult<Vec<Author>> {
        let query = format!("SELECT {AUTHOR_COLUMNS} FROM authors ORDER BY id");
        let authors = sqlx::query_as::<_, Author>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(authors)
    }

    async fn get_author(&self, id: i32) -> RepoResult<Option<Author>> {
        let query = format!("SELECT {AUTHOR_COLUMNS} FROM authors WHERE id = $1");
        let author = sqlx::query_as::<_, Author>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(author)
    }

    async fn get_author_by_user(&self, user_id: i32) -> RepoResult<Option<Author>> {
        let query = format!("SELECT {AUTHOR_COLUMNS} FROM authors WHERE user_id = $1 LIMIT 1");
        let author = sqlx::query_as::<_, Author>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(author)
    }

    async fn subscribe_newsletter(&self, email: &str) -> RepoResult<Newsletter> {
        let subscription = sqlx::query_as::<_, Newsletter>(
            "INSERT INTO newsletters (email) VALUES ($1) RETURNING id, email, created_at, updated_at",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(subscription)
    }

    async fn list_newsletters(&self) -> RepoResult<Vec<Newsletter>> {
        let subscriptions = sqlx::query_as::<_, Newsletter>(
            "SELECT id, email, created_at, updated_at FROM newsletters ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(subscriptions)
    }

    /// get_stats
    ///
    /// Compiles all dashboard counters in a single round trip.
    async fn get_stats(&self) -> RepoResult<Stats> {
        let stats = sqlx::query_as::<_, Stats>(
            r#"
            SELECT (SELECT COUNT(*) FROM posts) AS total_posts,
                   (SELECT COUNT(*) FROM newsletters) AS total_newsletter_subscribers,
                   (SELECT COUNT(*) FROM users) AS total_users
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}
