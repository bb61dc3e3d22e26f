#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use chrono::{NaiveDateTime, Utc};
use newsroom_api::{
    AppState, ChannelPool, RpcClient,
    auth::issue_token,
    broker::{Broker, MockBroker},
    config::AppConfig,
    create_router,
    models::{
        Author, IdentityRecord, Newsletter, Post, PostAuthor, PostWithAuthor, Role, Stats, User,
        UserCredentials, UserWithRole,
    },
    password::hash_password,
    repository::{NewUser, RepoResult, Repository, RepositoryError, RepositoryState, UserChanges},
    validation::ValidPost,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tower::ServiceExt;

// --- In-memory repository ---

#[derive(Clone)]
struct StoredUser {
    id: i32,
    name: String,
    email: String,
    hashed_password: String,
    role_id: Option<i32>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl StoredUser {
    fn public(&self) -> User {
        User {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn with_role(&self) -> UserWithRole {
        UserWithRole {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role_id: self.role_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Default)]
struct Store {
    users: Vec<StoredUser>,
    authors: Vec<Author>,
    posts: Vec<Post>,
    newsletters: Vec<Newsletter>,
    next_id: i32,
}

impl Store {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn post_with_author(&self, post: &Post) -> PostWithAuthor {
        let author = self.authors.iter().find(|a| a.id == post.author_id).map(|a| PostAuthor {
            id: a.id,
            name: self.users.iter().find(|u| u.id == a.user_id).map(|u| u.name.clone()),
            description: a.description.clone(),
        });
        PostWithAuthor {
            id: post.id,
            title: post.title.clone(),
            description: post.description.clone(),
            content: post.content.clone(),
            image: post.image.clone(),
            created_at: post.created_at,
            updated_at: post.updated_at,
            author,
        }
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// InMemoryRepository
///
/// Behaves like the Postgres store for everything the handlers and the auth gate
/// observe, including unique-email violations.
#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap()
    }

    /// Seeds a user. Pass `password: None` to skip the (slow) Argon2 hash.
    pub fn add_user(&self, name: &str, email: &str, password: Option<&str>, role_id: Option<i32>) -> i32 {
        let hashed_password = match password {
            Some(password) => hash_password(password).unwrap(),
            None => "not-a-phc-string".to_string(),
        };
        let mut store = self.lock();
        let id = store.next_id();
        store.users.push(StoredUser {
            id,
            name: name.to_string(),
            email: email.to_string(),
            hashed_password,
            role_id,
            created_at: now(),
            updated_at: now(),
        });
        id
    }

    pub fn set_role(&self, user_id: i32, role_id: Option<i32>) {
        let mut store = self.lock();
        if let Some(user) = store.users.iter_mut().find(|u| u.id == user_id) {
            user.role_id = role_id;
        }
    }

    pub fn role_of(&self, user_id: i32) -> Option<i32> {
        self.lock().users.iter().find(|u| u.id == user_id).and_then(|u| u.role_id)
    }

    pub fn name_of(&self, user_id: i32) -> Option<String> {
        self.lock().users.iter().find(|u| u.id == user_id).map(|u| u.name.clone())
    }

    pub fn remove_user(&self, user_id: i32) {
        self.lock().users.retain(|u| u.id != user_id);
    }

    pub fn add_author(&self, user_id: i32) -> i32 {
        let mut store = self.lock();
        let id = store.next_id();
        store.authors.push(Author {
            id,
            description: Some("Staff writer".to_string()),
            network: None,
            user_id,
            created_at: now(),
            updated_at: now(),
        });
        id
    }

    pub fn add_post(&self, author_id: i32, title: &str) -> i32 {
        let mut store = self.lock();
        let id = store.next_id();
        store.posts.push(Post {
            id,
            title: title.to_string(),
            description: "A description".to_string(),
            author_id,
            image: None,
            content: Some("Body".to_string()),
            created_at: now(),
            updated_at: now(),
        });
        id
    }

    pub fn post_title(&self, post_id: i32) -> Option<String> {
        self.lock().posts.iter().find(|p| p.id == post_id).map(|p| p.title.clone())
    }

    pub fn add_subscriber(&self, email: &str) {
        let mut store = self.lock();
        let id = store.next_id();
        store.newsletters.push(Newsletter {
            id,
            email: email.to_string(),
            created_at: now(),
            updated_at: now(),
        });
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_identity(&self, user_id: i32) -> RepoResult<Option<IdentityRecord>> {
        Ok(self.lock().users.iter().find(|u| u.id == user_id).map(|u| IdentityRecord {
            id: u.id,
            email: u.email.clone(),
            role_id: u.role_id,
        }))
    }

    async fn get_user(&self, id: i32) -> RepoResult<Option<User>> {
        Ok(self.lock().users.iter().find(|u| u.id == id).map(StoredUser::public))
    }

    async fn get_user_with_role(&self, id: i32) -> RepoResult<Option<UserWithRole>> {
        Ok(self.lock().users.iter().find(|u| u.id == id).map(StoredUser::with_role))
    }

    async fn list_users(&self) -> RepoResult<Vec<UserWithRole>> {
        Ok(self.lock().users.iter().map(StoredUser::with_role).collect())
    }

    async fn find_credentials(&self, email: &str) -> RepoResult<Option<UserCredentials>> {
        Ok(self.lock().users.iter().find(|u| u.email == email).map(|u| UserCredentials {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            hashed_password: u.hashed_password.clone(),
            role_id: u.role_id,
        }))
    }

    async fn email_exists(&self, email: &str) -> RepoResult<bool> {
        Ok(self.lock().users.iter().any(|u| u.email == email))
    }

    async fn create_user(&self, user: NewUser, role_id: i32) -> RepoResult<User> {
        let mut store = self.lock();
        if store.users.iter().any(|u| u.email == user.email) {
            return Err(RepositoryError::UniqueViolation("users_email_unique".to_string()));
        }
        let id = store.next_id();
        let stored = StoredUser {
            id,
            name: user.name,
            email: user.email,
            hashed_password: user.hashed_password,
            role_id: Some(role_id),
            created_at: now(),
            updated_at: now(),
        };
        let created = stored.public();
        store.users.push(stored);
        Ok(created)
    }

    async fn update_user(&self, id: i32, changes: UserChanges) -> RepoResult<Option<UserWithRole>> {
        let mut store = self.lock();
        if let Some(email) = &changes.email {
            if store.users.iter().any(|u| u.id != id && &u.email == email) {
                return Err(RepositoryError::UniqueViolation("users_email_unique".to_string()));
            }
        }
        let Some(user) = store.users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(hashed_password) = changes.hashed_password {
            user.hashed_password = hashed_password;
        }
        if let Some(role_id) = changes.role_id {
            user.role_id = Some(role_id);
        }
        user.updated_at = now();
        Ok(Some(user.with_role()))
    }

    async fn list_roles(&self) -> RepoResult<Vec<Role>> {
        Ok(["staff", "admin", "ceo"]
            .iter()
            .zip(1..)
            .map(|(name, id)| Role {
                id,
                name: name.to_string(),
                description: None,
            })
            .collect())
    }

    async fn list_posts(&self) -> RepoResult<Vec<PostWithAuthor>> {
        let store = self.lock();
        Ok(store.posts.iter().rev().map(|p| store.post_with_author(p)).collect())
    }

    async fn get_post(&self, id: i32) -> RepoResult<Option<PostWithAuthor>> {
        let store = self.lock();
        Ok(store.posts.iter().find(|p| p.id == id).map(|p| store.post_with_author(p)))
    }

    async fn get_post_record(&self, id: i32) -> RepoResult<Option<Post>> {
        Ok(self.lock().posts.iter().find(|p| p.id == id).cloned())
    }

    async fn create_post(&self, author_id: i32, post: ValidPost) -> RepoResult<Post> {
        let mut store = self.lock();
        let id = store.next_id();
        let created = Post {
            id,
            title: post.title,
            description: post.description,
            author_id,
            image: post.image,
            content: Some(post.content),
            created_at: now(),
            updated_at: now(),
        };
        store.posts.push(created.clone());
        Ok(created)
    }

    async fn update_post(&self, id: i32, post: ValidPost) -> RepoResult<Option<Post>> {
        let mut store = self.lock();
        let Some(existing) = store.posts.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        existing.title = post.title;
        existing.description = post.description;
        existing.content = Some(post.content);
        existing.image = post.image;
        existing.updated_at = now();
        Ok(Some(existing.clone()))
    }

    async fn list_authors(&self) -> RepoResult<Vec<Author>> {
        Ok(self.lock().authors.clone())
    }

    async fn get_author(&self, id: i32) -> RepoResult<Option<Author>> {
        Ok(self.lock().authors.iter().find(|a| a.id == id).cloned())
    }

    async fn get_author_by_user(&self, user_id: i32) -> RepoResult<Option<Author>> {
        Ok(self.lock().authors.iter().find(|a| a.user_id == user_id).cloned())
    }

    async fn subscribe_newsletter(&self, email: &str) -> RepoResult<Newsletter> {
        let mut store = self.lock();
        if store.newsletters.iter().any(|n| n.email == email) {
            return Err(RepositoryError::UniqueViolation("newsletters_email_unique".to_string()));
        }
        let id = store.next_id();
        let subscription = Newsletter {
            id,
            email: email.to_string(),
            created_at: now(),
            updated_at: now(),
        };
        store.newsletters.push(subscription.clone());
        Ok(subscription)
    }

    async fn list_newsletters(&self) -> RepoResult<Vec<Newsletter>> {
        Ok(self.lock().newsletters.clone())
    }

    async fn get_stats(&self) -> RepoResult<Stats> {
        let store = self.lock();
        Ok(Stats {
            total_posts: store.posts.len() as i64,
            total_newsletter_subscribers: store.newsletters.len() as i64,
            total_users: store.users.len() as i64,
        })
    }
}

// --- App wiring ---

pub fn test_config() -> AppConfig {
    AppConfig {
        rpc_timeout: Duration::from_millis(300),
        rpc_max_channels: 4,
        ..AppConfig::default()
    }
}

pub fn test_state_with(repo: Arc<InMemoryRepository>, broker: MockBroker, config: AppConfig) -> AppState {
    let broker = Arc::new(broker) as Arc<dyn Broker>;
    let pool = Arc::new(ChannelPool::new(broker, config.rpc_max_channels));
    let rpc = Arc::new(RpcClient::new(pool, config.rpc_timeout));
    AppState {
        repo: repo as RepositoryState,
        rpc,
        config,
    }
}

pub fn test_state(repo: Arc<InMemoryRepository>, broker: MockBroker) -> AppState {
    test_state_with(repo, broker, test_config())
}

pub fn test_app(repo: Arc<InMemoryRepository>, broker: MockBroker) -> Router {
    create_router(test_state(repo, broker))
}

pub fn token_for(user_id: i32, email: &str) -> String {
    issue_token(user_id, email, test_config().jwt_secret.as_deref()).unwrap()
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Sends one request through the router and decodes the body as JSON
/// (`Value::Null` for non-JSON bodies).
pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}
