use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// Public projection of a row in the `users` table. The password hash never leaves
/// the repository through this type.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// UserWithRole
///
/// A user joined with its (optional) role assignment from `users_roles`.
/// `role_id` is `None` when the user has no role.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserWithRole {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub role_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// IdentityRecord
///
/// Minimal point read used by the authorization gate: who the token subject is and
/// what role the store currently assigns them.
#[derive(Debug, Clone, FromRow, Default)]
pub struct IdentityRecord {
    pub id: i32,
    pub email: String,
    pub role_id: Option<i32>,
}

/// UserCredentials
///
/// Internal row used by the login flow only. Deliberately not `Serialize`.
#[derive(Debug, Clone, FromRow, Default)]
pub struct UserCredentials {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub hashed_password: String,
    pub role_id: Option<i32>,
}

/// Role
///
/// One rung of the fixed role ladder (`roles` table). The id doubles as the rank.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Role {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
}

/// Author
///
/// Author profile attached to a user (`authors` table). Only authors may publish posts.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Author {
    pub id: i32,
    pub description: Option<String>,
    /// Free-form social links, stored as `jsonb`.
    #[schema(value_type = Option<Object>)]
    pub network: Option<Value>,
    pub user_id: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Post
///
/// Raw row from the `posts` table, returned by the create/edit endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Post {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub author_id: i32,
    pub image: Option<String>,
    pub content: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// PostAuthor
///
/// The author summary embedded in post listings.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct PostAuthor {
    pub id: i32,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// PostWithAuthor
///
/// Enriched response for the public blog pages: a post plus its author summary.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PostWithAuthor {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub content: Option<String>,
    pub image: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub author: Option<PostAuthor>,
}

/// PostAuthorRow
///
/// Flat row produced by the `posts LEFT JOIN authors LEFT JOIN users` query.
/// Converted into `PostWithAuthor` by the repository.
#[derive(Debug, Clone, FromRow, Default)]
pub struct PostAuthorRow {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub content: Option<String>,
    pub image: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub author_id: Option<i32>,
    pub author_name: Option<String>,
    pub author_description: Option<String>,
}

impl From<PostAuthorRow> for PostWithAuthor {
    fn from(row: PostAuthorRow) -> Self {
        let author = row.author_id.map(|id| PostAuthor {
            id,
            name: row.author_name,
            description: row.author_description,
        });
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            content: row.content,
            image: row.image,
            created_at: row.created_at,
            updated_at: row.updated_at,
            author,
        }
    }
}

/// Newsletter
///
/// A newsletter subscription (`newsletters` table). Emails are unique.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Newsletter {
    pub id: i32,
    pub email: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// --- Request Payloads (Input Schemas) ---
//
// Text fields default to empty so a missing field reaches validation and gets a
// readable message instead of a generic extractor rejection.

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// RegisterUserRequest
///
/// Input for POST /auth/user/register. `role_id` defaults to staff (1).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RegisterUserRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub role_id: Option<i32>,
}

/// UpdateUserRequest
///
/// Partial update for PUT /users/{id}. Absent fields are left untouched.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<i32>,
}

/// PostRequest
///
/// Body shared by POST /blog and PUT /blog/edit/{id}.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PostRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub email: String,
}

/// GenerateContentRequest
///
/// Forwarded positionally to the `news_generator.generate` worker method as
/// `[urls, llm, length, custom_prompt, temperature]`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct GenerateContentRequest {
    #[serde(default)]
    pub urls: Vec<String>,
    pub llm: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub length: Option<Value>,
    pub custom_prompt: Option<String>,
    pub temperature: Option<f64>,
}

impl GenerateContentRequest {
    /// Positional argument list in the order the worker expects.
    pub fn into_args(self) -> Vec<Value> {
        vec![
            Value::from(self.urls),
            self.llm.map(Value::from).unwrap_or(Value::Null),
            self.length.unwrap_or(Value::Null),
            self.custom_prompt.map(Value::from).unwrap_or(Value::Null),
            self.temperature.map(Value::from).unwrap_or(Value::Null),
        ]
    }
}

// --- Response Schemas (Output) ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// LoginUser
///
/// The user summary returned alongside a freshly issued token.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LoginUser {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub role_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginResponse {
    pub message: String,
    pub user: LoginUser,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RegisterUserResponse {
    pub message: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateUserResponse {
    pub message: String,
    pub user: UserWithRole,
}

/// Stats
///
/// Aggregate counters for the dashboard (GET /stats).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Stats {
    pub total_posts: i64,
    pub total_newsletter_subscribers: i64,
    pub total_users: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct StatsResponse {
    pub stats: Stats,
}
