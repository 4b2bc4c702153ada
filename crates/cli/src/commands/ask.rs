//! `convrag ask`: One single-shot answer.

use convrag_gateway::build_pipeline;

pub async fn run(question: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config_with_key()?;
    let pipeline = build_pipeline(&config)?;

    eprint!("  Thinking...");
    let answer = pipeline.ask(question).await;
    eprint!("\r              \r");

    let answer = answer?;
    println!("{}", answer.text);

    if !answer.sources.is_empty() {
        eprintln!();
        eprintln!("  Sources:");
        for source in &answer.sources {
            eprintln!("    - {source}");
        }
    }

    Ok(())
}
