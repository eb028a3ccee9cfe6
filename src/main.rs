use anyhow::Context;
use folio_lib::config::RecommendationConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RecommendationConfig::from_env().context("invalid configuration")?;
    let engine = folio_lib::setup(&config)
        .await
        .context("failed to start recommendation engine")?;

    let health = engine.test_system_health().await;
    println!("{}", serde_json::to_string_pretty(&health)?);

    if let Some(user_id) = std::env::args().nth(1) {
        let response = engine
            .get_recommendations(&user_id)
            .await
            .with_context(|| format!("recommendations for '{}'", user_id))?;
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    Ok(())
}
