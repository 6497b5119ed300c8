//! Full pipeline: WebSocket session handler, SQLite storage, built-in tools
//! and a scripted model, then a replay of the stored conversation.

use std::sync::Arc;
use std::time::Duration;

use opencodex_agent::test_helpers::{ScriptedProvider, ScriptedReply};
use opencodex_agent::{ConversationHistoryBuilder, EndReason, ReactAgent, StreamEvent};
use opencodex_config::AppConfig;
use opencodex_core::message::{Role, TurnContent};
use opencodex_core::session::{ActionStatus, BlockContent, ChatSession};
use opencodex_core::store::SessionStore;
use opencodex_gateway::{GatewayState, StreamSession};
use opencodex_storage::SqliteStore;
use opencodex_tools::{LocalSandbox, Workspace, default_registry};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

async fn until_terminal(rx: &mut mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out")
            .expect("session closed");
        let done = event.is_terminal();
        events.push(event);
        if done {
            return events;
        }
    }
}

#[tokio::test]
async fn write_then_read_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let workspace_root = dir.path().join("workspace");
    std::fs::create_dir_all(&workspace_root).unwrap();
    let db_url = format!("sqlite://{}", dir.path().join("sessions.db").display());

    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedReply::tool_call(
            "I'll create the file.",
            "file_write",
            serde_json::json!({"path": "/workspace/hello.txt", "content": "hi there"}),
        ),
        ScriptedReply::tool_call(
            "",
            "bash",
            serde_json::json!({"command": "cat hello.txt"}),
        ),
        ScriptedReply::text(&["The file says ", "\"hi there\"."]),
    ]));
    let workspace = Workspace::new(
        &workspace_root,
        Arc::new(LocalSandbox::new(&workspace_root)),
    );
    let tools = Arc::new(default_registry(workspace, Duration::from_secs(10)));
    let agent = ReactAgent::new(provider.clone(), "gpt-4o", tools);

    let store: Arc<dyn SessionStore> = Arc::new(SqliteStore::new(&db_url).await.unwrap());
    let session = store
        .create_session(ChatSession::new("cli", "e2e"))
        .await
        .unwrap();
    let state = Arc::new(GatewayState::new(AppConfig::default(), store, agent));

    let (client_tx, client_rx) = mpsc::channel(4);
    let (server_tx, mut server_rx) = mpsc::channel(256);
    let task = tokio::spawn(
        StreamSession::new(state.clone(), &session.id, server_tx)
            .serve(ReceiverStream::new(client_rx)),
    );
    client_tx
        .send(r#"{"type":"message","content":"write hello.txt and show it"}"#.into())
        .await
        .unwrap();
    let events = until_terminal(&mut server_rx).await;
    drop(client_tx);
    task.await.unwrap();

    assert!(matches!(events[0], StreamEvent::Start));
    assert!(matches!(
        events.last(),
        Some(StreamEvent::End { reason: EndReason::FinalAnswer, content })
            if content == "The file says \"hi there\"."
    ));
    let observations: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Observation { tool, output, success, .. } => {
                Some((tool.as_str(), output.as_str(), *success))
            }
            _ => None,
        })
        .collect();
    assert_eq!(observations.len(), 2);
    assert_eq!(observations[0].0, "file_write");
    assert!(observations[0].2);
    assert_eq!(observations[1], ("bash", "hi there", true));
    assert_eq!(
        std::fs::read_to_string(workspace_root.join("hello.txt")).unwrap(),
        "hi there"
    );
    drop(state);

    // Reopen the database as a fresh process would.
    let reopened: Arc<dyn SessionStore> = Arc::new(SqliteStore::new(&db_url).await.unwrap());
    let actions = reopened.list_actions(&session.id).await.unwrap();
    assert_eq!(actions.len(), 2);
    assert!(actions.iter().all(|a| a.status == ActionStatus::Completed));

    let blocks = reopened.list_blocks(&session.id).await.unwrap();
    let numbers: Vec<i64> = blocks.iter().map(|b| b.sequence_number).collect();
    assert_eq!(numbers, (1..=blocks.len() as i64).collect::<Vec<_>>());
    assert!(matches!(
        blocks.last().map(|b| &b.content),
        Some(BlockContent::AssistantText { complete: true, .. })
    ));

    let history = ConversationHistoryBuilder::new(reopened, "gpt-4o")
        .build(&session.id)
        .await
        .unwrap();
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::User,
            Role::Assistant,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
        ]
    );
    assert_eq!(
        history[5].content,
        TurnContent::Text("[SUCCESS] hi there".into())
    );
    assert_eq!(provider.call_count(), 3);
}
