mod common;

use axum::http::{Method, StatusCode};
use common::{InMemoryRepository, request, send, test_app, token_for};
use newsroom_api::{
    auth::{ADMIN, CEO, STAFF},
    broker::{ConsumeFault, MockBroker},
};
use serde_json::json;
use std::sync::Arc;

// --- Fixtures ---

struct Newsroom {
    repo: Arc<InMemoryRepository>,
    staff: i32,
    admin: i32,
    ceo: i32,
}

impl Newsroom {
    fn new() -> Self {
        let repo = InMemoryRepository::new();
        let staff = repo.add_user("Sam Staff", "staff@news.com", None, Some(STAFF));
        let admin = repo.add_user("Ada Admin", "admin@news.com", None, Some(ADMIN));
        let ceo = repo.add_user("Cleo Ceo", "ceo@news.com", None, Some(CEO));
        Self { repo, staff, admin, ceo }
    }

    fn staff_token(&self) -> String {
        token_for(self.staff, "staff@news.com")
    }

    fn admin_token(&self) -> String {
        token_for(self.admin, "admin@news.com")
    }

    fn ceo_token(&self) -> String {
        token_for(self.ceo, "ceo@news.com")
    }

    fn app(&self) -> axum::Router {
        test_app(self.repo.clone(), MockBroker::new())
    }

    fn app_with_broker(&self, broker: MockBroker) -> axum::Router {
        test_app(self.repo.clone(), broker)
    }
}

// --- Infrastructure ---

#[tokio::test]
async fn test_health_is_public() {
    let app = Newsroom::new().app();
    let response = tower::ServiceExt::oneshot(app, request(Method::GET, "/health", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_unknown_route_is_not_found_even_without_token() {
    let (status, _) = send(Newsroom::new().app(), request(Method::GET, "/api/nope", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let (status, body) = send(Newsroom::new().app(), request(Method::GET, "/api-docs/openapi.json", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/generate"].is_object());
}

// --- Stats ---

#[tokio::test]
async fn test_stats_counts_everything() {
    let room = Newsroom::new();
    let author = room.repo.add_author(room.staff);
    room.repo.add_post(author, "First");
    room.repo.add_subscriber("reader@mail.com");

    let (status, body) = send(room.app(), request(Method::GET, "/api/stats", None, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "stats": { "totalPosts": 1, "totalNewsletterSubscribers": 1, "totalUsers": 3 } })
    );
}

// --- Newsletter ---

#[tokio::test]
async fn test_subscribe_validates_and_rejects_duplicates() {
    let room = Newsroom::new();
    let subscribe = |email: &str| request(Method::POST, "/api/newsletter/subscribe", None, Some(json!({ "email": email })));

    let (status, _) = send(room.app(), subscribe("reader@mail.com")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(room.app(), subscribe("not-an-email")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid email format");

    let (status, body) = send(room.app(), subscribe("reader@mail.com")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "Email is already subscribed");
}

#[tokio::test]
async fn test_newsletter_list_requires_admin() {
    let room = Newsroom::new();
    room.repo.add_subscriber("reader@mail.com");

    let (status, body) = send(room.app(), request(Method::GET, "/api/newsletter", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Authentication required");

    let (status, body) = send(room.app(), request(Method::GET, "/api/newsletter", Some(&room.staff_token()), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Insufficient permissions");

    let (status, body) = send(room.app(), request(Method::GET, "/api/newsletter", Some(&room.admin_token()), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}

// --- Content generation ---

#[tokio::test]
async fn test_generate_relays_worker_reply() {
    let room = Newsroom::new();
    let broker = MockBroker::new();
    broker.reply_with("news_generator.generate", json!({ "summary": "ok" }));

    let payload = json!({ "urls": ["https://example.com/story"], "llm": "gpt", "length": 200 });
    let (status, body) = send(
        room.app_with_broker(broker.clone()),
        request(Method::POST, "/api/generate", Some(&room.staff_token()), Some(payload)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "summary": "ok" }));
    assert_eq!(
        broker.published()[0].body_json(),
        json!({ "args": [["https://example.com/story"], "gpt", 200, null, null], "kwargs": {} })
    );
}

#[tokio::test]
async fn test_generate_requires_a_role() {
    let room = Newsroom::new();
    let roleless = room.repo.add_user("Nobody", "nobody@news.com", None, None);
    let body = Some(json!({ "urls": [] }));

    let (status, _) = send(room.app(), request(Method::POST, "/api/generate", None, body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = token_for(roleless, "nobody@news.com");
    let (status, _) = send(room.app(), request(Method::POST, "/api/generate", Some(&token), body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_generate_maps_rpc_failures() {
    let room = Newsroom::new();
    let body = Some(json!({ "urls": [] }));

    // No worker bound to the routing key: the call runs into its deadline.
    let (status, _) = send(
        room.app(),
        request(Method::POST, "/api/generate", Some(&room.staff_token()), body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

    let (status, response) = send(
        room.app_with_broker(MockBroker::new_unreachable()),
        request(Method::POST, "/api/generate", Some(&room.staff_token()), body),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response["message"], "An unexpected error occurred");
}

#[tokio::test]
async fn test_generate_hides_reply_consumer_failure() {
    let room = Newsroom::new();
    let broker = MockBroker::with_consume_fault(ConsumeFault::StreamEnds);
    broker.reply_with("news_generator.generate", json!({ "summary": "ok" }));

    let (status, response) = send(
        room.app_with_broker(broker.clone()),
        request(Method::POST, "/api/generate", Some(&room.staff_token()), Some(json!({ "urls": [] }))),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response, json!({ "message": "An unexpected error occurred" }));
    assert_eq!(broker.open_channels(), 0);
    assert_eq!(broker.queue_count(), 0);
}

// --- Login ---

#[tokio::test]
async fn test_login_issues_usable_token() {
    let repo = InMemoryRepository::new();
    let id = repo.add_user("Lia", "lia@news.com", Some("secret123"), Some(STAFF));
    let app = test_app(repo.clone(), MockBroker::new());

    let credentials = json!({ "email": "lia@news.com", "password": "secret123" });
    let (status, body) = send(app.clone(), request(Method::POST, "/api/auth/user/login", None, Some(credentials))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], id);
    assert_eq!(body["user"]["roleId"], STAFF);

    let token = body["token"].as_str().unwrap().to_string();
    let (status, me) = send(app, request(Method::GET, "/api/auth/user", Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "lia@news.com");
}

#[tokio::test]
async fn test_login_rejections() {
    let repo = InMemoryRepository::new();
    repo.add_user("Lia", "lia@news.com", Some("secret123"), Some(STAFF));
    let app = test_app(repo, MockBroker::new());
    let login = |body| request(Method::POST, "/api/auth/user/login", None, Some(body));

    let (status, body) = send(app.clone(), login(json!({ "email": "lia@news.com", "password": "wrong-one" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid credentials");

    let (status, body) = send(app.clone(), login(json!({ "email": "ghost@news.com", "password": "secret123" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid credentials");

    let (status, body) = send(app, login(json!({ "email": "lia@news.com" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Password is required");
}

// --- Registration ---

#[tokio::test]
async fn test_register_respects_hierarchy() {
    let room = Newsroom::new();
    let register = |token: &str, body| request(Method::POST, "/api/auth/user/register", Some(token), Some(body));

    let (status, _) = send(
        room.app(),
        register(&room.staff_token(), json!({ "name": "New", "email": "new@news.com", "password": "secret1" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        room.app(),
        register(&room.admin_token(), json!({ "name": "New", "email": "new@news.com", "password": "secret1", "roleId": ADMIN })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Cannot assign role equal to or higher than your own");

    let (status, body) = send(
        room.app(),
        register(&room.admin_token(), json!({ "name": "New", "email": "new@news.com", "password": "secret1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let new_id = body["user"]["id"].as_i64().unwrap() as i32;
    assert_eq!(room.repo.role_of(new_id), Some(STAFF));
}

#[tokio::test]
async fn test_register_input_errors() {
    let room = Newsroom::new();
    let register = |body| request(Method::POST, "/api/auth/user/register", Some(&room.ceo_token()), Some(body));

    let (status, body) = send(room.app(), register(json!({ "name": "X", "email": "x@news.com", "password": "123" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Password must be at least 6 characters long");

    let (status, _) = send(room.app(), register(json!({ "name": "X", "email": "x@news.com", "password": "secret1", "roleId": 7 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(room.app(), register(json!({ "name": "X", "email": "staff@news.com", "password": "secret1" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "User already exists");
}

// --- Users ---

#[tokio::test]
async fn test_user_listing_is_admin_only() {
    let room = Newsroom::new();

    let (status, _) = send(room.app(), request(Method::GET, "/api/users", Some(&room.staff_token()), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(room.app(), request(Method::GET, "/api/users", Some(&room.admin_token()), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(3));

    let uri = format!("/api/users/{}", room.ceo);
    let (status, body) = send(room.app(), request(Method::GET, &uri, Some(&room.admin_token()), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["roleId"], CEO);

    let (status, _) = send(room.app(), request(Method::GET, "/api/users/9999", Some(&room.admin_token()), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_user_hierarchy() {
    let room = Newsroom::new();
    let update = |token: &str, id: i32, body| {
        request(Method::PUT, &format!("/api/users/{}", id), Some(token), Some(body))
    };

    // Outranked target.
    let (status, _) = send(room.app(), update(&room.staff_token(), room.admin, json!({ "name": "Hacked" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Promotion to the caller's own rank.
    let (status, _) = send(room.app(), update(&room.admin_token(), room.staff, json!({ "roleId": ADMIN }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Allowed edit of a lower-ranked user.
    let (status, body) = send(room.app(), update(&room.ceo_token(), room.staff, json!({ "name": "Sam Senior", "roleId": ADMIN }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["roleId"], ADMIN);
    assert_eq!(room.repo.name_of(room.staff).as_deref(), Some("Sam Senior"));

    let (status, _) = send(room.app(), update(&room.ceo_token(), 9999, json!({ "name": "Ghost" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_self_update_cannot_change_own_role() {
    let room = Newsroom::new();
    let uri = format!("/api/users/{}", room.staff);

    let (status, body) = send(
        room.app(),
        request(Method::PUT, &uri, Some(&room.staff_token()), Some(json!({ "name": "Sam", "roleId": CEO }))),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["name"], "Sam");
    assert_eq!(room.repo.role_of(room.staff), Some(STAFF));
}

#[tokio::test]
async fn test_self_update_ignores_out_of_range_role() {
    let room = Newsroom::new();
    let uri = format!("/api/users/{}", room.admin);

    let (status, body) = send(
        room.app(),
        request(Method::PUT, &uri, Some(&room.admin_token()), Some(json!({ "name": "Ada", "roleId": 9 }))),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["name"], "Ada");
    assert_eq!(room.repo.role_of(room.admin), Some(ADMIN));
}

#[tokio::test]
async fn test_update_other_user_rejects_out_of_range_role() {
    let room = Newsroom::new();
    let uri = format!("/api/users/{}", room.staff);

    let (status, body) = send(
        room.app(),
        request(Method::PUT, &uri, Some(&room.admin_token()), Some(json!({ "roleId": 0 }))),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid role");
}

#[tokio::test]
async fn test_update_user_duplicate_email_conflicts() {
    let room = Newsroom::new();
    let uri = format!("/api/users/{}", room.staff);

    let (status, _) = send(
        room.app(),
        request(Method::PUT, &uri, Some(&room.staff_token()), Some(json!({ "email": "ceo@news.com" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_deleted_user_token_is_rejected() {
    let room = Newsroom::new();
    let token = room.admin_token();
    room.repo.remove_user(room.admin);

    let (status, body) = send(room.app(), request(Method::GET, "/api/auth/user", Some(&token), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Authentication required");
}

// --- Roles ---

#[tokio::test]
async fn test_roles_for_any_role_holder() {
    let room = Newsroom::new();
    let (status, body) = send(room.app(), request(Method::GET, "/api/roles", Some(&room.staff_token()), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(3));
}

// --- Blog ---

#[tokio::test]
async fn test_public_blog_reads() {
    let room = Newsroom::new();
    let author = room.repo.add_author(room.staff);
    let post = room.repo.add_post(author, "Hello");

    let (status, body) = send(room.app(), request(Method::GET, "/api/blog/posts", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["author"]["name"], "Sam Staff");

    let (status, body) = send(room.app(), request(Method::GET, &format!("/api/blog/{}", post), None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Hello");

    let (status, _) = send(room.app(), request(Method::GET, "/api/blog/9999", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(room.app(), request(Method::GET, &format!("/api/blog/author/{}", author), None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], room.staff);
}

#[tokio::test]
async fn test_only_authors_create_posts() {
    let room = Newsroom::new();
    room.repo.add_author(room.staff);
    let post = json!({ "title": "T", "description": "D", "content": "C", "image": "" });

    let (status, body) = send(room.app(), request(Method::POST, "/api/blog", Some(&room.admin_token()), Some(post.clone()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Only authors can create posts");

    let (status, body) = send(room.app(), request(Method::POST, "/api/blog", Some(&room.staff_token()), Some(post))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["title"], "T");
    assert!(body["image"].is_null());

    let (status, body) = send(
        room.app(),
        request(Method::POST, "/api/blog", Some(&room.staff_token()), Some(json!({ "title": "T" }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Title, description, and content are required");
}

#[tokio::test]
async fn test_only_the_owner_edits_a_post() {
    let room = Newsroom::new();
    let staff_author = room.repo.add_author(room.staff);
    room.repo.add_author(room.admin);
    let post = room.repo.add_post(staff_author, "Original");
    let edit = json!({ "title": "Edited", "description": "D", "content": "C" });
    let uri = format!("/api/blog/edit/{}", post);

    let (status, body) = send(room.app(), request(Method::PUT, &uri, Some(&room.admin_token()), Some(edit.clone()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You can only edit your own posts");
    assert_eq!(room.repo.post_title(post).as_deref(), Some("Original"));

    let (status, _) = send(room.app(), request(Method::PUT, &uri, Some(&room.ceo_token()), Some(edit.clone()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(room.app(), request(Method::PUT, &uri, Some(&room.staff_token()), Some(edit.clone()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Edited");

    let (status, _) = send(room.app(), request(Method::PUT, "/api/blog/edit/9999", Some(&room.staff_token()), Some(edit))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
