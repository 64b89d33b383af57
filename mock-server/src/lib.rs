use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const SUCCESS_CODE: i64 = 200;
pub const SESSION_INVALID_CODE: i64 = 500_001;
pub const LOGIN_FAILED_CODE: i64 = 401;

const ADMIN_USERNAME: &str = "admin";
const ADMIN_PASSWORD: &str = "123456";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    pub message: String,
    pub data: T,
}

impl<T> Envelope<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            code: SUCCESS_CODE,
            message: "OK".to_string(),
            data,
        })
    }
}

fn failure(code: i64, message: &str) -> Json<Envelope<Value>> {
    Json(Envelope {
        code,
        message: message.to_string(),
        data: Value::Null,
    })
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: u64,
    pub username: String,
    pub nickname: String,
    pub email: String,
    pub avatar: String,
    pub role: String,
    pub permissions: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub token: String,
    pub user_info: UserInfo,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserItem {
    pub id: u64,
    pub username: String,
    pub nickname: String,
    pub status: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserList {
    pub list: Vec<UserItem>,
    pub total: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_name: Option<String>,
    pub state: Option<i32>,
}

#[derive(Deserialize)]
pub struct SlowQuery {
    pub ms: u64,
}

/// Tokens issued by `/auth/login` and not yet revoked.
pub type Sessions = Arc<RwLock<HashSet<String>>>;

pub fn app() -> Router {
    let sessions: Sessions = Arc::new(RwLock::new(HashSet::new()));
    let api = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/users/list", get(list_users))
        .route("/users/export", get(export_users))
        .route("/status/{code}", get(bare_status))
        .route("/slow", get(slow))
        .route("/legacy/ping", get(legacy_ping))
        .with_state(sessions);
    Router::new().nest("/api", api)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Token from `Authorization: Token <t>` (or `Bearer <t>`).
fn bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Token ")
        .or_else(|| value.strip_prefix("Bearer "))?;
    Some(token.trim().to_string())
}

async fn authorized(sessions: &Sessions, headers: &HeaderMap) -> bool {
    match bearer(headers) {
        Some(token) => sessions.read().await.contains(&token),
        None => false,
    }
}

fn admin() -> UserInfo {
    UserInfo {
        id: 1,
        username: ADMIN_USERNAME.to_string(),
        nickname: "Administrator".to_string(),
        email: "admin@example.com".to_string(),
        avatar: "https://avatars.githubusercontent.com/u/1?v=4".to_string(),
        role: "admin".to_string(),
        permissions: vec!["user:read".into(), "user:write".into(), "system:admin".into()],
    }
}

fn users() -> Vec<UserItem> {
    vec![
        UserItem {
            id: 1,
            username: "admin".to_string(),
            nickname: "Administrator".to_string(),
            status: 1,
        },
        UserItem {
            id: 2,
            username: "user".to_string(),
            nickname: "Regular user".to_string(),
            status: 1,
        },
        UserItem {
            id: 3,
            username: "guest".to_string(),
            nickname: "Disabled guest".to_string(),
            status: 0,
        },
    ]
}

async fn login(State(sessions): State<Sessions>, Json(input): Json<LoginRequest>) -> Response {
    if input.username != ADMIN_USERNAME || input.password != ADMIN_PASSWORD {
        tracing::info!(username = %input.username, "login rejected");
        return failure(LOGIN_FAILED_CODE, "Incorrect username or password").into_response();
    }
    let token = Uuid::new_v4().to_string();
    sessions.write().await.insert(token.clone());
    tracing::info!(username = %input.username, "login accepted");
    Envelope::ok(LoginData {
        token,
        user_info: admin(),
    })
    .into_response()
}

async fn logout(State(sessions): State<Sessions>, headers: HeaderMap) -> Json<Envelope<Value>> {
    if let Some(token) = bearer(&headers) {
        sessions.write().await.remove(&token);
    }
    Envelope::ok(Value::Null)
}

async fn list_users(
    State(sessions): State<Sessions>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
) -> Response {
    if !authorized(&sessions, &headers).await {
        return failure(SESSION_INVALID_CODE, "Login expired, please sign in again").into_response();
    }
    let list: Vec<UserItem> = users()
        .into_iter()
        .filter(|u| query.user_name.as_deref().map_or(true, |name| u.username.contains(name)))
        .filter(|u| query.state.map_or(true, |state| u.status == state))
        .collect();
    let total = list.len() as u64;
    Envelope::ok(UserList { list, total }).into_response()
}

async fn export_users(State(sessions): State<Sessions>, headers: HeaderMap) -> Response {
    if !authorized(&sessions, &headers).await {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut csv = String::from("id,username,status\n");
    for u in users() {
        csv.push_str(&format!("{},{},{}\n", u.id, u.username, u.status));
    }
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"users.csv\""),
        ],
        csv,
    )
        .into_response()
}

/// Reply with a bare HTTP status and no envelope.
async fn bare_status(Path(code): Path<u16>) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, status.canonical_reason().unwrap_or("error").to_string()).into_response()
}

async fn slow(Query(query): Query<SlowQuery>) -> Json<Envelope<Value>> {
    tokio::time::sleep(Duration::from_millis(query.ms)).await;
    Envelope::ok(Value::String("done".to_string()))
}

/// Older backends answer with `{code: 0, msg, data}`.
async fn legacy_ping() -> Json<HashMap<&'static str, Value>> {
    Json(HashMap::from([
        ("code", Value::from(0)),
        ("msg", Value::from("ok")),
        ("data", Value::from("pong")),
    ]))
}
