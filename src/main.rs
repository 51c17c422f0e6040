use anyhow::Context;

use booking_signup::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("Failed to load configuration")?;

    eprintln!("Booking signup v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", config.backend.base_url);
    eprintln!("   API: http://0.0.0.0:{}/api/signup/sessions", config.server.port);

    booking_signup::server::run(config)
        .await
        .context("Signup API stopped")?;

    Ok(())
}
