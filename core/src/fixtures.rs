//! Canned envelopes served by the mock router.

use serde_json::{json, Value};

use crate::envelope::{SESSION_INVALID_CODE, SUCCESS_CODE};

pub const MOCK_TOKEN: &str = "mock-jwt-token-123456789";
pub const MOCK_USERNAME: &str = "admin";
pub const MOCK_PASSWORD: &str = "123456";

pub fn login_success() -> Value {
    json!({
        "code": SUCCESS_CODE,
        "message": "Login succeeded",
        "data": {
            "token": MOCK_TOKEN,
            "userInfo": {
                "id": 1,
                "username": MOCK_USERNAME,
                "nickname": "Administrator",
                "email": "admin@example.com",
                "avatar": "https://avatars.githubusercontent.com/u/1?v=4",
                "role": "admin",
                "permissions": ["user:read", "user:write", "system:admin"]
            }
        }
    })
}

pub fn login_failure() -> Value {
    json!({
        "code": 401,
        "message": "Incorrect username or password",
        "data": null
    })
}

pub fn user_list() -> Value {
    json!({
        "code": SUCCESS_CODE,
        "message": "OK",
        "data": {
            "list": [
                { "id": 1, "username": "admin", "nickname": "Administrator", "status": 1 },
                { "id": 2, "username": "user", "nickname": "Regular user", "status": 1 }
            ],
            "total": 2
        }
    })
}

pub fn session_expired() -> Value {
    json!({
        "code": SESSION_INVALID_CODE,
        "message": "Login expired, please sign in again",
        "data": null
    })
}

/// Login handler: the fixed admin credentials succeed, anything else fails.
pub fn login(payload: &Value) -> Value {
    let username = payload.get("username").and_then(Value::as_str);
    let password = payload.get("password").and_then(Value::as_str);
    if username == Some(MOCK_USERNAME) && password == Some(MOCK_PASSWORD) {
        login_success()
    } else {
        login_failure()
    }
}
