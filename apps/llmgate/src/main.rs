use std::net::SocketAddr;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let boot = llmgate_core::bootstrap::bootstrap_from_env().await?;
    if let Some(key) = &boot.generated_admin_key {
        tracing::warn!(admin_key = %key, "generated admin key; store it, it will not be shown again");
    }

    let global = boot.state.global.load();
    let bind = format!("{}:{}", global.host, global.port);
    drop(global);

    tokio::spawn(llmgate_core::scheduler::run(boot.state.clone()));

    let app = axum::Router::new()
        .merge(llmgate_router::proxy_router(boot.state.clone()))
        .merge(llmgate_router::admin_router(boot.state.clone()));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
