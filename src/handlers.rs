use crate::{
    AppState,
    auth::{self, AuthUser, rank_or_zero},
    error::{ApiError, ApiResult},
    models::{
        Author, GenerateContentRequest, LoginRequest, LoginResponse, LoginUser, MessageResponse,
        Newsletter, Post, PostRequest, PostWithAuthor, RegisterUserRequest, RegisterUserResponse,
        Role, StatsResponse, SubscribeRequest, UpdateUserRequest, UpdateUserResponse, User,
        UserWithRole,
    },
    password::{hash_password, verify_password},
    repository::{NewUser, RepositoryError, UserChanges},
    validation::ROLE_ID_RANGE,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::Value;

/// The worker service and method behind POST /generate.
pub const GENERATOR_SERVICE: &str = "news_generator";
pub const GENERATOR_METHOD: &str = "generate";

fn conflict_on_duplicate(message: &'static str) -> impl FnOnce(RepositoryError) -> ApiError {
    move |err| match err {
        RepositoryError::UniqueViolation(_) => ApiError::Conflict(message.to_string()),
        other => other.into(),
    }
}

// --- Auth ---

/// login
///
/// [Public Route] Exchanges email and password for a 24-hour bearer token.
/// Unknown email and wrong password produce the same 401.
#[utoipa::path(
    post,
    path = "/api/auth/user/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Invalid input", body = MessageResponse),
        (status = 401, description = "Invalid credentials", body = MessageResponse)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    payload.validate().map_err(ApiError::Validation)?;

    let invalid = || ApiError::Unauthorized("Invalid credentials".to_string());
    let credentials = state
        .repo
        .find_credentials(&payload.email)
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&payload.password, &credentials.hashed_password) {
        tracing::info!(user_id = credentials.id, "login rejected: wrong password");
        return Err(invalid());
    }

    let token = auth::issue_token(
        credentials.id,
        &credentials.email,
        state.config.jwt_secret.as_deref(),
    )?;
    tracing::info!(user_id = credentials.id, "user logged in");

    Ok(Json(LoginResponse {
        message: "Login successful".to_string(),
        user: LoginUser {
            id: credentials.id,
            name: credentials.name,
            email: credentials.email,
            role_id: credentials.role_id,
        },
        token,
    }))
}

/// get_current_user
///
/// [Authenticated Route] Profile of the token's subject.
#[utoipa::path(
    get,
    path = "/api/auth/user",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Not authenticated", body = MessageResponse)
    )
)]
pub async fn get_current_user(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<User>> {
    state
        .repo
        .get_user(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}

/// register_user
///
/// [Admin Route] Creates a user with a role strictly below the caller's.
#[utoipa::path(
    post,
    path = "/api/auth/user/register",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "User created", body = RegisterUserResponse),
        (status = 400, description = "Invalid input", body = MessageResponse),
        (status = 403, description = "Role too high", body = MessageResponse),
        (status = 409, description = "Email already registered", body = MessageResponse)
    )
)]
pub async fn register_user(
    caller: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> ApiResult<(StatusCode, Json<RegisterUserResponse>)> {
    payload.validate().map_err(ApiError::Validation)?;

    if state.repo.email_exists(&payload.email).await? {
        return Err(ApiError::Conflict("User already exists".to_string()));
    }

    let role_id = payload.role_id.unwrap_or(auth::STAFF);
    if !ROLE_ID_RANGE.contains(&role_id) {
        return Err(ApiError::Validation("Invalid role".to_string()));
    }
    if role_id >= rank_or_zero(&caller) {
        return Err(ApiError::Forbidden(
            "Cannot assign role equal to or higher than your own".to_string(),
        ));
    }

    let new_user = NewUser {
        name: payload.name,
        email: payload.email,
        hashed_password: hash_password(&payload.password)?,
    };
    let user = state
        .repo
        .create_user(new_user, role_id)
        .await
        .map_err(conflict_on_duplicate("User already exists"))?;

    tracing::info!(user_id = user.id, role_id, created_by = caller.id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisterUserResponse {
            message: "User created successfully".to_string(),
            user,
        }),
    ))
}

// --- Users ---

#[utoipa::path(
    get,
    path = "/api/users",
    responses((status = 200, description = "All users", body = [UserWithRole]))
)]
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<UserWithRole>>> {
    Ok(Json(state.repo.list_users().await?))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "Found", body = UserWithRole),
        (status = 404, description = "Not found", body = MessageResponse)
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<UserWithRole>> {
    state
        .repo
        .get_user_with_role(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}

/// update_user
///
/// [Authenticated Route] Anyone may edit themselves (except their own role). Editing
/// someone else requires outranking them, and a new role must stay below the caller.
#[utoipa::path(
    put,
    path = "/api/users/{id}",
    request_body = UpdateUserRequest,
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "Updated", body = UpdateUserResponse),
        (status = 400, description = "Invalid input", body = MessageResponse),
        (status = 403, description = "Insufficient rank", body = MessageResponse),
        (status = 404, description = "Not found", body = MessageResponse),
        (status = 409, description = "Email already in use", body = MessageResponse)
    )
)]
pub async fn update_user(
    caller: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateUserRequest>,
) -> ApiResult<Json<UpdateUserResponse>> {
    let target = state
        .repo
        .get_user_with_role(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let is_self_update = caller.id == id;
    let caller_rank = rank_or_zero(&caller);

    if !is_self_update {
        if target.role_id.unwrap_or(0) >= caller_rank {
            return Err(ApiError::Forbidden(
                "Cannot edit users with equal or higher privileges than yourself".to_string(),
            ));
        }
        if payload.role_id.is_some_and(|role_id| role_id >= caller_rank) {
            return Err(ApiError::Forbidden(
                "Cannot assign role equal to or higher than your own".to_string(),
            ));
        }
        if payload.role_id.is_some_and(|role_id| !ROLE_ID_RANGE.contains(&role_id)) {
            return Err(ApiError::Validation("Invalid role".to_string()));
        }
    }

    payload.validate().map_err(ApiError::Validation)?;

    let hashed_password = payload.password.as_deref().map(hash_password).transpose()?;
    let changes = UserChanges {
        name: payload.name,
        email: payload.email,
        hashed_password,
        // A user can never change their own role.
        role_id: if is_self_update { None } else { payload.role_id },
    };

    let user = state
        .repo
        .update_user(id, changes)
        .await
        .map_err(conflict_on_duplicate("Email already in use"))?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    tracing::info!(user_id = id, updated_by = caller.id, "user updated");
    Ok(Json(UpdateUserResponse {
        message: "User updated successfully".to_string(),
        user,
    }))
}

// --- Roles ---

#[utoipa::path(
    get,
    path = "/api/roles",
    responses((status = 200, description = "All roles", body = [Role]))
)]
pub async fn list_roles(State(state): State<AppState>) -> ApiResult<Json<Vec<Role>>> {
    Ok(Json(state.repo.list_roles().await?))
}

// --- Blog ---

/// list_posts
///
/// [Public Route] Every post with its author summary, newest first.
#[utoipa::path(
    get,
    path = "/api/blog/posts",
    responses((status = 200, description = "All posts", body = [PostWithAuthor]))
)]
pub async fn list_posts(State(state): State<AppState>) -> ApiResult<Json<Vec<PostWithAuthor>>> {
    Ok(Json(state.repo.list_posts().await?))
}

#[utoipa::path(
    get,
    path = "/api/blog/{id}",
    params(("id" = i32, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Found", body = PostWithAuthor),
        (status = 404, description = "Not found", body = MessageResponse)
    )
)]
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<PostWithAuthor>> {
    state
        .repo
        .get_post(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Post not found".to_string()))
}

/// create_post
///
/// [Authenticated Route] Only users with an author profile may publish.
#[utoipa::path(
    post,
    path = "/api/blog",
    request_body = PostRequest,
    responses(
        (status = 201, description = "Created", body = Post),
        (status = 400, description = "Invalid input", body = MessageResponse),
        (status = 403, description = "Not an author", body = MessageResponse)
    )
)]
pub async fn create_post(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<PostRequest>,
) -> ApiResult<(StatusCode, Json<Post>)> {
    let author = state
        .repo
        .get_author_by_user(user_id)
        .await?
        .ok_or_else(|| ApiError::Forbidden("Only authors can create posts".to_string()))?;

    let post = payload.validate().map_err(ApiError::Validation)?;
    let created = state.repo.create_post(author.id, post).await?;

    tracing::info!(post_id = created.id, author_id = author.id, "post created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// edit_post
///
/// [Authenticated Route] Owner-only edit: the caller's author profile must be the
/// post's author.
#[utoipa::path(
    put,
    path = "/api/blog/edit/{id}",
    request_body = PostRequest,
    params(("id" = i32, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Updated", body = Post),
        (status = 400, description = "Invalid input", body = MessageResponse),
        (status = 403, description = "Not the owner", body = MessageResponse),
        (status = 404, description = "Not found", body = MessageResponse)
    )
)]
pub async fn edit_post(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<PostRequest>,
) -> ApiResult<Json<Post>> {
    let not_found = || ApiError::NotFound("Post not found".to_string());
    let existing = state.repo.get_post_record(id).await?.ok_or_else(not_found)?;

    let author = state
        .repo
        .get_author_by_user(user_id)
        .await?
        .ok_or_else(|| ApiError::Forbidden("Only authors can edit posts".to_string()))?;
    if existing.author_id != author.id {
        return Err(ApiError::Forbidden("You can only edit your own posts".to_string()));
    }

    let post = payload.validate().map_err(ApiError::Validation)?;
    let updated = state.repo.update_post(id, post).await?.ok_or_else(not_found)?;

    tracing::info!(post_id = id, author_id = author.id, "post updated");
    Ok(Json(updated))
}

// --- Authors ---

#[utoipa::path(
    get,
    path = "/api/blog/author",
    responses((status = 200, description = "All authors", body = [Author]))
)]
pub async fn list_authors(State(state): State<AppState>) -> ApiResult<Json<Vec<Author>>> {
    Ok(Json(state.repo.list_authors().await?))
}

#[utoipa::path(
    get,
    path = "/api/blog/author/{id}",
    params(("id" = i32, Path, description = "Author ID")),
    responses(
        (status = 200, description = "Found", body = Author),
        (status = 404, description = "Not found", body = MessageResponse)
    )
)]
pub async fn get_author(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Author>> {
    state
        .repo
        .get_author(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Author not found".to_string()))
}

// --- Newsletter ---

/// subscribe_newsletter
///
/// [Public Route] Adds an email to the newsletter list. Emails are unique.
#[utoipa::path(
    post,
    path = "/api/newsletter/subscribe",
    request_body = SubscribeRequest,
    responses(
        (status = 200, description = "Subscribed", body = MessageResponse),
        (status = 400, description = "Invalid email", body = MessageResponse),
        (status = 409, description = "Already subscribed", body = MessageResponse)
    )
)]
pub async fn subscribe_newsletter(
    State(state): State<AppState>,
    Json(payload): Json<SubscribeRequest>,
) -> ApiResult<Json<MessageResponse>> {
    payload.validate().map_err(ApiError::Validation)?;
    state
        .repo
        .subscribe_newsletter(&payload.email)
        .await
        .map_err(conflict_on_duplicate("Email is already subscribed"))?;
    Ok(Json(MessageResponse::new("Subscribed to newsletter successfully")))
}

#[utoipa::path(
    get,
    path = "/api/newsletter",
    responses((status = 200, description = "All subscriptions", body = [Newsletter]))
)]
pub async fn list_newsletters(State(state): State<AppState>) -> ApiResult<Json<Vec<Newsletter>>> {
    Ok(Json(state.repo.list_newsletters().await?))
}

// --- Stats ---

#[utoipa::path(
    get,
    path = "/api/stats",
    responses((status = 200, description = "Dashboard counters", body = StatsResponse))
)]
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let stats = state.repo.get_stats().await?;
    Ok(Json(StatsResponse { stats }))
}

// --- Content generation ---

/// generate_content
///
/// [Staff Route] Forwards the request to the `news_generator` worker over the broker
/// and relays its reply verbatim.
#[utoipa::path(
    post,
    path = "/api/generate",
    request_body = GenerateContentRequest,
    responses(
        (status = 200, description = "Worker reply, relayed as-is"),
        (status = 500, description = "RPC failure", body = MessageResponse),
        (status = 504, description = "Worker did not reply in time", body = MessageResponse)
    )
)]
pub async fn generate_content(
    State(state): State<AppState>,
    Json(payload): Json<GenerateContentRequest>,
) -> ApiResult<Json<Value>> {
    let reply = state
        .rpc
        .call(GENERATOR_SERVICE, GENERATOR_METHOD, payload.into_args())
        .await?;
    Ok(Json(reply))
}
