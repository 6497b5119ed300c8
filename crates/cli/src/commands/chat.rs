//! `opencodex chat`: Run the agent against a persisted session from the terminal.
//!
//! The terminal is just another client of [`StreamSession`]: every turn is
//! persisted exactly as it would be over the WebSocket.

use std::io::{BufRead, Write};
use std::sync::Arc;

use opencodex_agent::StreamEvent;
use opencodex_config::AppConfig;
use opencodex_core::session::ChatSession;
use opencodex_gateway::{GatewayState, StreamSession};
use opencodex_providers::factory;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Longest observation shown inline.
const MAX_OBSERVATION_CHARS: usize = 400;

pub async fn run(
    message: Option<String>,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if !config.has_api_key() && !factory::is_local(&config.default_provider) {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!("  Set OPENCODEX_API_KEY or OPENAI_API_KEY, or add api_key to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found".into());
    }

    let model = config.default_model.clone();
    let provider = config.default_provider.clone();
    let state = Arc::new(GatewayState::from_config(config).await?);

    let session_id = match session {
        Some(id) => state
            .store
            .get_session(&id)
            .await?
            .ok_or_else(|| format!("Chat session not found: {id}"))?
            .id,
        None => {
            state
                .store
                .create_session(ChatSession::new("cli", "Terminal chat"))
                .await?
                .id
        }
    };

    let (client_tx, client_rx) = mpsc::channel::<String>(8);
    let (server_tx, mut server_rx) = mpsc::channel::<StreamEvent>(256);
    let serving = tokio::spawn(
        StreamSession::new(state, &session_id, server_tx).serve(ReceiverStream::new(client_rx)),
    );

    if let Some(msg) = message {
        client_tx.send(frame(&msg)).await?;
        print_until_terminal(&mut server_rx).await?;
    } else {
        println!();
        println!("  OpenCodex — Interactive Mode");
        println!();
        println!("  Provider:  {provider}");
        println!("  Model:     {model}");
        println!("  Session:   {session_id}");
        println!();
        println!("  Type your message and press Enter. Type 'exit' to quit.");
        println!();

        let (line_tx, mut line_rx) = mpsc::channel::<String>(1);
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line_tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });

        loop {
            print!("  You > ");
            std::io::stdout().flush()?;
            let Some(line) = line_rx.recv().await else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if matches!(line, "exit" | "quit") {
                break;
            }
            client_tx.send(frame(line)).await?;
            print_until_terminal(&mut server_rx).await?;
        }
        println!("\n  Goodbye!\n");
    }

    drop(client_tx);
    serving.await?;
    Ok(())
}

fn frame(content: &str) -> String {
    serde_json::json!({ "type": "message", "content": content }).to_string()
}

async fn print_until_terminal(
    events: &mut mpsc::Receiver<StreamEvent>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();
        if let Some(text) = render(&event) {
            write!(stdout, "{text}")?;
            stdout.flush()?;
        }
        if terminal {
            break;
        }
    }
    Ok(())
}

/// Terminal rendering of one event; `None` for events with no visible form.
pub fn render(event: &StreamEvent) -> Option<String> {
    match event {
        StreamEvent::Chunk { content } => Some(content.clone()),
        StreamEvent::Action { tool, input, step } => {
            Some(format!("\n  [{step}] {tool} {input}\n"))
        }
        StreamEvent::Observation {
            output,
            success,
            metadata,
            ..
        } => {
            let mark = if *success { "ok" } else { "failed" };
            let mut shown: String = output.chars().take(MAX_OBSERVATION_CHARS).collect();
            if output.chars().count() > MAX_OBSERVATION_CHARS {
                shown.push_str(" …");
            }
            let image = metadata
                .as_ref()
                .and_then(|m| m.image())
                .map(|img| format!(" [image: {}]", img.filename.as_deref().unwrap_or(&img.mime_type)))
                .unwrap_or_default();
            Some(format!("      {mark}: {shown}{image}\n\n"))
        }
        StreamEvent::End { reason, .. } => Some(match reason {
            opencodex_agent::EndReason::FinalAnswer => "\n\n".to_string(),
            opencodex_agent::EndReason::MaxIterations => "\n\n  [stopped: step limit reached]\n\n".into(),
            opencodex_agent::EndReason::Cancelled => "\n\n  [cancelled]\n\n".into(),
        }),
        StreamEvent::Error { message } => Some(format!("\n  [Error] {message}\n\n")),
        StreamEvent::Start
        | StreamEvent::UserMessageSaved { .. }
        | StreamEvent::ActionStreaming { .. }
        | StreamEvent::Thought { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencodex_agent::EndReason;

    #[test]
    fn chunks_render_verbatim() {
        assert_eq!(
            render(&StreamEvent::Chunk {
                content: "Hello".into()
            }),
            Some("Hello".into())
        );
        assert_eq!(render(&StreamEvent::Start), None);
        assert_eq!(render(&StreamEvent::action_streaming("bash", 1)), None);
    }

    #[test]
    fn long_observations_are_truncated() {
        let text = render(&StreamEvent::Observation {
            tool: "bash".into(),
            output: "x".repeat(1000),
            success: true,
            step: 1,
            metadata: None,
        })
        .unwrap();
        assert!(text.contains("ok: "));
        assert!(text.contains('…'));
        assert!(text.len() < 1000);
    }

    #[test]
    fn end_reasons_are_labelled() {
        let text = render(&StreamEvent::End {
            content: String::new(),
            reason: EndReason::MaxIterations,
        })
        .unwrap();
        assert!(text.contains("step limit"));
    }

    #[test]
    fn frame_is_a_message() {
        let value: serde_json::Value = serde_json::from_str(&frame("hi")).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["content"], "hi");
    }
}
