//! `convrag chat`: Interactive multi-turn session.

use std::io::Write;

use convrag_gateway::build_pipeline;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(session: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config_with_key()?;
    let pipeline = build_pipeline(&config)?;

    // Claim the session id up front so every turn lands in the same history.
    let (session_id, history) = pipeline.sessions().resolve(session.as_deref()).await;

    println!();
    println!("  convrag: interactive chat");
    println!();
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", pipeline.settings().model);
    println!("  Session:   {session_id}");
    if !history.is_empty() {
        println!("  History:   {} turns", history.len());
    }
    println!();
    println!("  Type your question and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        eprint!("  ...");
        let result = pipeline.run(question, Some(session_id.as_str())).await;
        eprint!("\r     \r");

        match result {
            Ok(exchange) => {
                println!();
                for line in exchange.answer.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
            }
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}
