//! `chatrecall chat`: interactive or single-message chat.

use chatrecall_agent::{ChatSession, TurnOutcome};
use chatrecall_config::{AppConfig, ContextMode};
use chatrecall_core::provider::Provider;
use chatrecall_providers::OpenAiCompatProvider;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    session: Option<String>,
    message: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let Some(api_key) = config.api_key.clone() else {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!("    CHATRECALL_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add `api_key` to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    };

    let provider: Arc<dyn Provider> =
        Arc::new(OpenAiCompatProvider::new("openai", config.api_url.clone(), api_key));
    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let chat = ChatSession::open(&config, &session_id, provider).await?;

    if let Some(msg) = message {
        eprint!("  Thinking...");
        let outcome = chat.respond(&msg).await;
        eprint!("\r              \r");
        println!("{}", outcome?.reply.content);
        return Ok(());
    }

    let mode = match config.context.mode {
        ContextMode::Embedding => format!(
            "{} (similar {}, recent {})",
            config.context.embedding_model,
            config.context.similar_exchanges,
            config.context.recent_exchanges
        ),
        ContextMode::FullHistory => "full history".to_string(),
    };

    println!();
    println!("  ChatRecall Interactive Mode");
    println!();
    println!("  Session:   {session_id}");
    println!("  Model:     {}", config.model);
    println!("  Context:   {mode}");
    println!("  Data:      {}", config.session_dir(&session_id).display());
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if matches!(input, "exit" | "quit") {
            break;
        }
        if !input.is_empty() {
            eprint!("  ...");
            let outcome = chat.respond(input).await;
            eprint!("\r     \r");
            match outcome {
                Ok(outcome) => print_reply(&config.assistant_name, &outcome),
                Err(e) => eprintln!("  [Error] {e}"),
            }
        }
        prompt()?;
    }

    println!();
    println!("  Resume with: chatrecall chat --session {session_id}");
    println!();

    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

fn print_reply(name: &str, outcome: &TurnOutcome) {
    println!();
    for line in outcome.reply.content.lines() {
        println!("  {name} > {line}");
    }
    println!(
        "  [{} prompt + {} completion tokens]",
        outcome.usage.prompt_tokens, outcome.usage.completion_tokens
    );
    println!();
}
