use financial_research_agent::{
    agent::Agent,
    config::AgentConfig,
    events::{AgentEvent, EventSender, RunContext},
    llm::GeminiClient,
    memory::ConversationHistory,
    tools::create_default_registry,
};
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};

/// Print progress to stderr and the answer to stdout.
fn render(event: &AgentEvent) {
    match event {
        AgentEvent::QueryReceived { query } => eprintln!("> {}", query),
        AgentEvent::TasksPlanned { tasks } => {
            eprintln!("Plan:");
            for task in tasks {
                eprintln!("  {}. {}", task.id, task.description);
            }
        }
        AgentEvent::SubtasksPlanned { subtasks } => {
            for planned in subtasks {
                for subtask in &planned.subtasks {
                    eprintln!("     {}.{} {}", planned.task.id, subtask.id, subtask.description);
                }
            }
        }
        AgentEvent::TaskStart { task_id } => eprintln!("[task {}] started", task_id),
        AgentEvent::TaskComplete { task_id, success } => {
            eprintln!("[task {}] {}", task_id, if *success { "done" } else { "failed" })
        }
        AgentEvent::SubtaskComplete {
            task_id,
            subtask_id,
            success,
        } => eprintln!(
            "  [subtask {}.{}] {}",
            task_id,
            subtask_id,
            if *success { "done" } else { "failed" }
        ),
        AgentEvent::Diagnostic { message } => eprintln!("  ! {}", message),
        AgentEvent::Status {
            message,
            active: true,
        } => eprintln!("  … {}", message),
        AgentEvent::AnswerStart {} => eprintln!(),
        AgentEvent::AnswerChunk { text } => {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }
        AgentEvent::AnswerEnd {} => println!(),
        AgentEvent::Error { message } => eprintln!("Error: {}", message),
        _ => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; stdout is reserved for the answer
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        eprintln!("usage: research-agent <question>");
        std::process::exit(2);
    }

    let config = AgentConfig::from_env()?;
    if config.financial_api_key.is_empty() {
        warn!("FINANCIAL_DATASETS_API_KEY not set; every tool call will fail");
    }

    let model = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    )?);
    let tools = Arc::new(create_default_registry(&config)?);
    let agent = Agent::from_config(model, tools, &config);

    info!(model = %config.gemini_model, "Research agent initialized");

    let (events, mut rx) = EventSender::channel();
    let ctx = RunContext::new(events);

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            render(&event);
        }
    });

    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut history = ConversationHistory::new();
    let outcome = agent.run(&query, &mut history, &ctx).await;

    drop(ctx);
    let _ = printer.await;

    match outcome {
        Ok(_) => Ok(()),
        Err(e) => Err(Box::new(e) as Box<dyn std::error::Error>),
    }
}
