//! Login, registration and session restore on top of an envelope client.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::Result;
use crate::client::Client;
use crate::error::{ApiError, Error};
use crate::request::RequestConfig;
use crate::session::{
    KeyValueStore, REFRESH_TOKEN_KEY, TOKEN_KEY, USER_INFO_KEY, load_json, store_json,
};
use crate::util::lock_unpoisoned;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: u64,
    pub user_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: UserInfo,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub user_name: String,
    pub email: String,
    pub password: String,
    pub password_again: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: u64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RefreshTokenResponse {
    token: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthState {
    pub is_authenticated: bool,
    pub user: Option<UserInfo>,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthAction {
    SetCredentials {
        user: UserInfo,
        token: String,
        refresh_token: Option<String>,
    },
    Logout,
}

impl AuthState {
    pub fn reduce(self, action: AuthAction) -> Self {
        match action {
            AuthAction::SetCredentials {
                user,
                token,
                refresh_token,
            } => Self {
                is_authenticated: true,
                user: Some(user),
                token: Some(token),
                refresh_token,
            },
            AuthAction::Logout => Self::default(),
        }
    }
}

pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, action: AuthAction);
}

/// An [`AuthState`] behind a mutex, updated through [`AuthState::reduce`].
#[derive(Clone, Debug, Default)]
pub struct SharedAuthState {
    state: Arc<Mutex<AuthState>>,
}

impl SharedAuthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> AuthState {
        lock_unpoisoned(&self.state).clone()
    }
}

impl Dispatcher for SharedAuthState {
    fn dispatch(&self, action: AuthAction) {
        let mut state = lock_unpoisoned(&self.state);
        let current = std::mem::take(&mut *state);
        *state = current.reduce(action);
    }
}

#[derive(Clone)]
pub struct AuthService {
    client: Client<Value>,
    store: Arc<dyn KeyValueStore>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl AuthService {
    pub fn new(
        client: Client<Value>,
        store: Arc<dyn KeyValueStore>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            client,
            store,
            dispatcher,
        }
    }

    /// Persists the returned credentials and marks the session active.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let response: LoginResponse = self
            .client
            .post_as(LOGIN_PATH, request, RequestConfig::new())
            .await?;

        self.store.set(TOKEN_KEY, response.token.clone());
        match &response.refresh_token {
            Some(refresh_token) => self.store.set(REFRESH_TOKEN_KEY, refresh_token.clone()),
            None => self.store.remove(REFRESH_TOKEN_KEY),
        }
        store_json(self.store.as_ref(), USER_INFO_KEY, &response.user)?;
        self.dispatcher.dispatch(AuthAction::SetCredentials {
            user: response.user.clone(),
            token: response.token.clone(),
            refresh_token: response.refresh_token.clone(),
        });
        info!(user_id = response.user.id, "logged in");
        Ok(response)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        self.client
            .post_as(REGISTER_PATH, request, RequestConfig::new())
            .await
    }

    /// Trades the stored refresh token for a new access token and stores it.
    pub async fn refresh_token(&self) -> Result<String> {
        let Some(refresh_token) = self.store.get(REFRESH_TOKEN_KEY) else {
            return Err(Error::Api(ApiError::from_status(
                401,
                "no refresh token stored",
                None,
            )));
        };
        let response: RefreshTokenResponse = self
            .client
            .post_as(
                REFRESH_PATH,
                &json!({ "refreshToken": refresh_token }),
                RequestConfig::new(),
            )
            .await?;
        self.store.set(TOKEN_KEY, response.token.clone());
        debug!("access token refreshed");
        Ok(response.token)
    }

    /// Clears local credentials even when the server call fails; the call's
    /// failure is still returned.
    pub async fn logout(&self) -> Result<()> {
        let result = self
            .client
            .post(LOGOUT_PATH, &json!({}), RequestConfig::new())
            .await;
        if let Err(error) = &result {
            warn!(error = %error, "logout request failed, clearing local session anyway");
        }
        self.clear_session();
        result.map(|_| ())
    }

    /// Rebuilds the session from storage. Returns whether a session is now
    /// active; a token without readable user info restores nothing.
    pub fn restore_session(&self) -> bool {
        let Some(token) = self.store.get(TOKEN_KEY) else {
            self.dispatcher.dispatch(AuthAction::Logout);
            return false;
        };
        let Some(user) = load_json::<UserInfo>(self.store.as_ref(), USER_INFO_KEY) else {
            warn!("stored token has no readable user info, session not restored");
            return false;
        };
        self.dispatcher.dispatch(AuthAction::SetCredentials {
            user,
            token,
            refresh_token: self.store.get(REFRESH_TOKEN_KEY),
        });
        true
    }

    fn clear_session(&self) {
        self.store.remove(TOKEN_KEY);
        self.store.remove(REFRESH_TOKEN_KEY);
        self.store.remove(USER_INFO_KEY);
        self.dispatcher.dispatch(AuthAction::Logout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserInfo {
        UserInfo {
            id: 7,
            user_name: "admin".to_owned(),
            email: "admin@example.com".to_owned(),
            avatar: None,
        }
    }

    #[test]
    fn reducer_sets_and_clears_credentials() {
        let state = AuthState::default().reduce(AuthAction::SetCredentials {
            user: user(),
            token: "t1".to_owned(),
            refresh_token: Some("r1".to_owned()),
        });
        assert!(state.is_authenticated);
        assert_eq!(state.token.as_deref(), Some("t1"));
        assert_eq!(state.user.as_ref().map(|user| user.id), Some(7));

        let state = state.reduce(AuthAction::Logout);
        assert_eq!(state, AuthState::default());
    }

    #[test]
    fn shared_state_applies_dispatched_actions() {
        let shared = SharedAuthState::new();
        shared.dispatch(AuthAction::SetCredentials {
            user: user(),
            token: "t1".to_owned(),
            refresh_token: None,
        });
        assert!(shared.snapshot().is_authenticated);
        shared.dispatch(AuthAction::Logout);
        assert!(!shared.snapshot().is_authenticated);
    }

    #[test]
    fn user_info_uses_camel_case_on_the_wire() {
        let encoded = serde_json::to_value(user()).expect("user should serialize");
        assert_eq!(
            encoded,
            json!({ "id": 7, "userName": "admin", "email": "admin@example.com" })
        );
    }
}
