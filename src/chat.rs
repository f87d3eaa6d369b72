// Interactive terminal chat against the same dispatcher the web UI uses.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::dispatcher::{ChatContext, Dispatcher};
use crate::error::ChatError;
use crate::render::RenderedDisplay;
use crate::session::SessionProvider;
use crate::stream::StreamUpdate;

pub async fn run_terminal_chat(
    dispatcher: Dispatcher,
    sessions: &dyn SessionProvider,
    chat_id: Option<&str>,
) -> Result<()> {
    let ctx = Arc::new(
        ChatContext::open(sessions, dispatcher.persistence(), chat_id)
            .await
            .context("Failed to open chat")?,
    );
    info!(chat_id = %ctx.chat_id(), signed_in = ctx.session().is_some(), "Starting terminal chat");

    println!("Repurposely AI Writer (chat {}). Type /exit to quit.", ctx.chat_id());
    for entry in ctx.renderable().await {
        match entry.display {
            RenderedDisplay::UserText(text) => println!("you> {}", text),
            RenderedDisplay::AssistantText(text) => println!("writer> {}", text),
            RenderedDisplay::ToolCards(_) | RenderedDisplay::Empty => {}
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line == "/exit" {
            break;
        }

        let submission = match dispatcher.submit(ctx.clone(), line).await {
            Ok(submission) => submission,
            Err(ChatError::EmptyInput) => continue,
            Err(e) => {
                eprintln!("error: {}", e);
                continue;
            }
        };

        print!("writer> ");
        let mut stream = submission.stream;
        while let Some(update) = stream.next().await {
            match update {
                StreamUpdate::Delta(text) => {
                    print!("{}", text);
                    std::io::stdout().flush()?;
                }
                StreamUpdate::Done(_) => println!(),
                StreamUpdate::Failed(message) => println!("\n[error] {}", message),
            }
        }
    }

    println!("Goodbye.");
    Ok(())
}
