//! `convrag serve`: Start the HTTP gateway.

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config_with_key()?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("convrag gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Profile:   {:?}", config.profile);
    println!(
        "   Index:     {}",
        config
            .retrieval
            .index_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".into())
    );

    convrag_gateway::start(config).await?;

    Ok(())
}
