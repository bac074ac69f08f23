use std::sync::Arc;

use anyhow::Context;

use vectorsmith_infra::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vectorsmith_observability::init();

    let settings = Settings::from_env().context("invalid configuration")?;
    let services = Arc::new(vectorsmith_api::app::build_services(&settings).await?);
    let app = vectorsmith_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
