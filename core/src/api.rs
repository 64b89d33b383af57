//! Typed endpoints of the admin backend.

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::types::{LoginData, LoginParams, UserList, UserSearch};

pub const LOGIN_PATH: &str = "/auth/login";
pub const USER_LIST_PATH: &str = "/users/list";

impl ApiClient {
    /// Sign in and keep the returned token for later calls.
    pub async fn login(&self, params: &LoginParams) -> Result<LoginData, ApiError> {
        let data: LoginData = self.post(LOGIN_PATH, params).await?;
        self.tokens().set_token(&data.token).map_err(|e| self.report(e))?;
        tracing::info!(username = %data.user_info.username, "signed in");
        Ok(data)
    }

    /// Forget the local credential. The backend is not contacted.
    pub fn logout(&self) {
        if self.tokens().evict() {
            tracing::info!("signed out");
        }
    }

    pub async fn user_list(&self, search: &UserSearch) -> Result<UserList, ApiError> {
        self.get(USER_LIST_PATH, search).await
    }
}
