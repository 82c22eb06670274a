use std::sync::Arc;
use std::time::Duration;

use fetchx::prelude::{
    AuthService, BearerAuth, ClearSessionOnUnauthorized, ClientBuilder, ClientConfig, LoadingFlag,
    LoggingErrorInterceptor, MemoryStore, RequestConfig, SharedAuthState, UnwrapEnvelope,
    with_loading,
};
use fetchx::LoginRequest;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRow {
    id: u64,
    user_name: String,
}

#[derive(Debug, Deserialize)]
struct UserPage {
    total: u64,
    list: Vec<UserRow>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let store = Arc::new(MemoryStore::new());
    let state = SharedAuthState::new();
    let navigator = Arc::new(|path: &str| println!("navigate => {path}"));

    let client = ClientBuilder::from_config(ClientConfig::from_env())
        .client_name("fetchx-example-envelope")
        .add_request_interceptor(BearerAuth::new(store.clone()))
        .add_error_interceptor(LoggingErrorInterceptor)
        .unwrap_envelopes(
            UnwrapEnvelope::new().on_unauthorized(ClearSessionOnUnauthorized::new(
                store.clone(),
                navigator,
            )),
        )
        .try_build()?;

    let auth = AuthService::new(client.clone(), store.clone(), Arc::new(state.clone()));
    if !auth.restore_session() {
        let login = auth
            .login(&LoginRequest {
                email: "admin@example.com".to_owned(),
                password: "admin123".to_owned(),
            })
            .await?;
        println!("logged in as {}", login.user.user_name);
    }

    let loading = LoadingFlag::new();
    let page: UserPage = with_loading(
        &loading,
        client.get_as(
            "/user/list",
            RequestConfig::new()
                .with_param("page", 1)
                .with_param("pageSize", 20)
                .with_timeout(Duration::from_secs(5)),
        ),
    )
    .await?;

    println!("users total={}", page.total);
    for user in &page.list {
        println!("  #{} {}", user.id, user.user_name);
    }

    auth.logout().await?;
    println!("authenticated={}", state.snapshot().is_authenticated);
    Ok(())
}
