//! Interactive chat REPL for agentrt.
//!
//! Usage:
//!   ANTHROPIC_API_KEY=sk-... cargo run --example chat
//!   ANTHROPIC_API_KEY=sk-... cargo run --example chat -- --model claude-opus-4-20250514
//!   OPENAI_API_KEY=sk-... cargo run --example chat -- --provider openai --model gpt-4o
//!
//! Ctrl-C or type "exit" / "quit" to leave.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use agentrt::{
    AgentEvent, AgentLoop, AgentLoopConfig, AnthropicBackend, CircuitBreaker, CircuitBreakerConfig,
    CompactionConfig, ContextManager, Message, ModelBackend, OpenAiCompatBackend, RetryLevel,
    RetryPolicy, ToolPipeline, ToolRegistry,
};
use clap::Parser;

#[derive(Parser)]
#[command(name = "chat", about = "Chat with an agentrt agent")]
struct Cli {
    /// Provider: "anthropic" or "openai"
    #[arg(long, default_value = "anthropic")]
    provider: String,

    /// Model to use
    #[arg(long, default_value = "claude-sonnet-4-20250514")]
    model: String,

    /// System prompt
    #[arg(long, short = 's')]
    system: Option<String>,

    /// Max output tokens per turn
    #[arg(long, default_value_t = 4096)]
    max_tokens: u32,

    /// Context window size
    #[arg(long, default_value_t = 200_000)]
    context_window: u32,

    /// Max agent loop iterations per message
    #[arg(long, default_value_t = 25)]
    max_iterations: usize,

    /// API base URL (defaults depend on provider)
    #[arg(long)]
    base_url: Option<String>,
}

fn build_backend(cli: &Cli) -> Arc<dyn ModelBackend> {
    match cli.provider.as_str() {
        "anthropic" => {
            let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_else(|_| {
                eprintln!("error: ANTHROPIC_API_KEY not set");
                std::process::exit(1);
            });
            let mut backend = AnthropicBackend::new(api_key);
            if let Some(ref url) = cli.base_url {
                backend = backend.with_base_url(url.clone());
            }
            Arc::new(backend)
        }
        "openai" => {
            let base = cli.base_url.clone().unwrap_or_else(|| "https://api.openai.com".into());
            let mut backend = OpenAiCompatBackend::new("openai", base);
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                backend = backend.with_api_key(key);
            }
            Arc::new(backend)
        }
        other => {
            eprintln!("error: unknown provider '{other}'. Use 'anthropic' or 'openai'.");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let backend = build_backend(&cli);

    let counter = agentrt::token::TokenCounter::with_default_encoding();
    let mut context = ContextManager::new(counter, CompactionConfig::default());
    if let Some(ref sys) = cli.system {
        context = context.with_system_prompt(sys.clone());
    }

    // No tools wired up in this demo — pure chat.
    let tools = ToolPipeline::new(ToolRegistry::new());
    let circuit_breaker = Arc::new(CircuitBreaker::new(cli.provider.clone(), CircuitBreakerConfig::default()));
    let retry_policy = RetryPolicy::for_level(RetryLevel::Balanced);
    let loop_config = AgentLoopConfig {
        model: cli.model.clone(),
        max_tokens: cli.max_tokens,
        temperature: None,
        max_iterations: cli.max_iterations,
        context_window: cli.context_window,
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<AgentEvent>();
    let mut agent = AgentLoop::new(backend, context, tools, circuit_breaker, retry_policy, loop_config)
        .with_events(tx);

    eprintln!("agentrt chat");
    eprintln!("provider: {}", cli.provider);
    eprintln!("model: {}", cli.model);
    if let Some(ref sys) = cli.system {
        eprintln!("system: {sys}");
    }
    eprintln!("---");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        eprint!("\x1b[1;36myou>\x1b[0m ");
        io::stderr().flush().ok();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if matches!(trimmed, "exit" | "quit" | "/q") {
            break;
        }

        let run_result = agent.run(Message::user(trimmed)).await;
        while let Ok(event) = rx.try_recv() {
            print_event(event);
        }

        match run_result {
            Ok(result) => {
                eprint!("\x1b[1;32magent>\x1b[0m ");
                println!("{}", result.output);
                eprintln!(
                    "\x1b[2m  [{} in / {} out tokens, {} iteration(s)]\x1b[0m",
                    result.usage.prompt_tokens, result.usage.completion_tokens, result.iterations
                );
            }
            Err(e) => {
                eprintln!("\x1b[1;31merror:\x1b[0m {e}");
            }
        }
    }

    eprintln!("bye.");
}

fn print_event(event: AgentEvent) {
    match event {
        AgentEvent::Text { content } => {
            eprintln!("\x1b[2;3m  [text] {content}\x1b[0m");
        }
        AgentEvent::ToolCall { name, input } => {
            eprintln!("\x1b[33m  [tool: {name}]\x1b[0m {input}");
        }
        AgentEvent::ToolResult { name, output, is_error } => {
            let tag = if is_error { "error" } else { "result" };
            let truncated = if output.len() > 200 { format!("{}...", &output[..200]) } else { output };
            eprintln!("\x1b[33m  [{tag}: {name}]\x1b[0m {truncated}");
        }
        AgentEvent::Compacted { pre_tokens, post_tokens } => {
            eprintln!("\x1b[35m  [compacted: {pre_tokens} → {post_tokens} tokens]\x1b[0m");
        }
        AgentEvent::Finished { turns } => {
            if turns > 1 {
                eprintln!("\x1b[2m  ({turns} turns)\x1b[0m");
            }
        }
        _ => {}
    }
}
