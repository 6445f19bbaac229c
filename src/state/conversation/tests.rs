use super::state::Phase;
use super::*;
use crate::api::{MockProvider, MockStream, ProviderErrorKind, ProviderKind};
use crate::config::{AiConfig, Config, SystemContext, UserConfig};
use crate::types::{Message, Mode, Role, StreamEvent};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

fn test_config(mode: Mode) -> Config {
    Config {
        ai: AiConfig {
            provider: "openai".to_string(),
            api_key: "test-key".to_string(),
            proxy: None,
            base_url: None,
            model: "mock-model".to_string(),
            temperature: 0.2,
            max_tokens: 256,
        },
        user: UserConfig {
            default_mode: mode,
            preferences: String::new(),
        },
        system: SystemContext {
            operating_system: Some("linux".to_string()),
            shell: Some("bash".to_string()),
            ..SystemContext::default()
        },
    }
}

fn mock_engine(
    mode: Mode,
) -> (
    MockProvider,
    ConversationEngine,
    mpsc::UnboundedReceiver<StreamEvent>,
) {
    let provider = MockProvider::new(ProviderKind::OpenAi);
    let (engine, events) = ConversationEngine::new(Box::new(provider.clone()), &test_config(mode));
    (provider, engine, events)
}

fn drain(events: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn contents(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.content.as_str()).collect()
}

fn seed_history(engine: &mut ConversationEngine, turns: usize) {
    for turn in 0..turns {
        engine.push_user_message(&format!("question {turn}"));
        engine.push_assistant_message(format!("answer {turn}"));
    }
}

#[test]
fn test_conversation_module_structure() {
    let _ = std::any::TypeId::of::<ConversationEngine>();
    let _ = std::any::TypeId::of::<InterruptHandle>();

    assert!(Path::new("src/state/conversation/state.rs").exists());
    assert!(Path::new("src/state/conversation/core.rs").exists());
    assert!(Path::new("src/state/conversation/prompt.rs").exists());
    assert!(Path::new("src/state/conversation/streaming.rs").exists());
    assert!(Path::new("src/state/conversation/history.rs").exists());
}

#[test]
fn test_terminal_outputs_keep_last_five_in_order() {
    let (_provider, mut engine, _events) = mock_engine(Mode::Exec);
    for index in 0..8 {
        engine.add_terminal_output(&format!("output {index}"));
    }
    engine.add_terminal_output("   \n");

    let stored: Vec<&str> = engine.terminal_outputs().collect();
    assert_eq!(
        stored,
        vec!["output 3", "output 4", "output 5", "output 6", "output 7"]
    );
}

#[test]
fn test_set_mode_to_same_mode_keeps_shared_history() {
    let (_provider, mut engine, _events) = mock_engine(Mode::Exec);
    seed_history(&mut engine, 1);
    engine.set_mode(Mode::Chat);
    let snapshot = engine.shared_history().to_vec();

    seed_history(&mut engine, 2);
    engine.set_mode(Mode::Chat);

    assert_eq!(engine.shared_history(), snapshot.as_slice());
    assert_eq!(engine.mode(), Mode::Chat);
}

#[test]
fn test_set_mode_snapshots_tail_of_previous_history() {
    let (_provider, mut engine, _events) = mock_engine(Mode::Exec);
    seed_history(&mut engine, 4);

    engine.set_mode(Mode::Chat);

    assert_eq!(
        contents(engine.shared_history()),
        vec!["answer 1", "question 2", "answer 2", "question 3", "answer 3"]
    );
    assert_eq!(engine.history(Mode::Exec).len(), 8);

    engine.set_mode(Mode::Exec);
    assert!(
        engine.shared_history().is_empty(),
        "leaving an empty chat history overwrites the snapshot"
    );
}

#[test]
fn test_set_mode_with_short_history_copies_everything() {
    let (_provider, mut engine, _events) = mock_engine(Mode::Chat);
    seed_history(&mut engine, 1);
    engine.set_mode(Mode::Exec);
    assert_eq!(contents(engine.shared_history()), vec!["question 0", "answer 0"]);
}

#[test]
fn test_clear_only_touches_active_history() {
    let (_provider, mut engine, _events) = mock_engine(Mode::Exec);
    seed_history(&mut engine, 2);
    engine.set_mode(Mode::Chat);
    seed_history(&mut engine, 1);
    engine.add_terminal_output("$ ls\n[ok]");

    engine.clear();

    assert!(engine.history(Mode::Chat).is_empty());
    assert_eq!(engine.history(Mode::Exec).len(), 4);
    assert_eq!(engine.shared_history().len(), 4);
    assert_eq!(engine.terminal_outputs().len(), 1);
}

#[test]
fn test_reset_empties_both_histories_and_snapshots_active_one() {
    let (_provider, mut engine, _events) = mock_engine(Mode::Exec);
    seed_history(&mut engine, 1);
    engine.set_mode(Mode::Chat);
    seed_history(&mut engine, 3);

    engine.reset();

    assert!(engine.history(Mode::Exec).is_empty());
    assert!(engine.history(Mode::Chat).is_empty());
    assert_eq!(
        contents(engine.shared_history()),
        vec!["answer 0", "question 1", "answer 1", "question 2", "answer 2"]
    );
    assert_eq!(engine.mode(), Mode::Chat);
}

#[test]
fn test_set_pipe_picks_mode_unless_explicit() {
    let (_provider, mut engine, _events) = mock_engine(Mode::Exec);
    engine.set_pipe("What is the weather like today?");
    assert_eq!(engine.mode(), Mode::Chat);
    assert_eq!(engine.pipe(), Some("What is the weather like today?"));

    let (_provider, engine, _events) = mock_engine(Mode::Chat);
    let mut engine = engine.with_explicit_mode(Mode::Chat);
    engine.set_pipe("ls -la");
    assert_eq!(engine.mode(), Mode::Chat);

    let (_provider, mut engine, _events) = mock_engine(Mode::Chat);
    engine.set_pipe("ls -la");
    assert_eq!(engine.mode(), Mode::Exec);

    engine.set_pipe("  ");
    assert_eq!(engine.pipe(), Some("ls -la"));
}

#[test]
fn test_prepare_messages_orders_context_blocks() {
    let (_provider, mut engine, _events) = mock_engine(Mode::Exec);
    engine.set_pipe("ls -la /var/log");
    engine.add_terminal_output("$ df -h\n[ok]");
    engine.push_user_message("which file is biggest");

    let messages = engine.prepare_messages();
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::System, Role::User]
    );
    assert!(messages[0].content.contains("my operating system is linux"));
    assert_eq!(
        messages[1].content,
        "I will work on the following input: ls -la /var/log"
    );
    assert!(messages[2].content.contains("Terminal output 1:\n```\n$ df -h\n[ok]\n```"));
    assert_eq!(messages[3].content, "which file is biggest");
}

#[test]
fn test_prepare_messages_includes_handoff_only_on_first_turn() {
    let (_provider, mut engine, _events) = mock_engine(Mode::Exec);
    seed_history(&mut engine, 1);
    engine.set_mode(Mode::Chat);

    engine.push_user_message("why did that work?");
    let first_turn = engine.prepare_messages();
    // The user message is already in history, so the handoff is gone.
    assert_eq!(first_turn.len(), 2);

    engine.clear();
    let fresh = engine.prepare_messages();
    assert_eq!(
        contents(&fresh[1..]),
        vec![
            "Here is recent context from command mode that might be relevant:",
            "question 0",
            "answer 0",
            "Now continuing in chat mode:",
        ]
    );
    assert_eq!(fresh[1].role, Role::System);
    assert_eq!(fresh[2].role, Role::User);
}

#[test]
fn test_parse_exec_result_staged_recovery() {
    let strict = parse_exec_result(r#"{"cmd":"ls ~","exp":"list home","exec":true}"#);
    assert_eq!(strict.command, "ls ~");

    let embedded = parse_exec_result(r#"Sure, here: {"cmd":"ls","exp":"list","exec":true} extra"#);
    assert_eq!(embedded.command, "ls");
    assert_eq!(embedded.explanation, "list");
    assert!(embedded.executable);

    let nested = parse_exec_result(
        r#"Here you go {"cmd":"awk '{print $1}' access.log","exp":"first column","exec":true}"#,
    );
    assert_eq!(nested.command, "awk '{print $1}' access.log");

    let plain = parse_exec_result("I cannot help with that");
    assert_eq!(
        plain,
        crate::types::ExecResult {
            command: String::new(),
            explanation: "I cannot help with that".to_string(),
            executable: false,
        }
    );
}

#[tokio::test]
async fn test_exec_completion_recovers_embedded_json() {
    let (provider, mut engine, mut events) = mock_engine(Mode::Exec);
    provider.push_completion(r#"Sure, here: {"cmd":"ls","exp":"list","exec":true} extra"#);

    let result = engine.exec_completion("list files").await.unwrap();

    assert_eq!(result.command, "ls");
    assert!(result.executable);
    assert_eq!(
        contents(engine.history(Mode::Exec)),
        vec![
            "list files",
            r#"Sure, here: {"cmd":"ls","exp":"list","exec":true} extra"#
        ]
    );
    assert!(drain(&mut events).is_empty());

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].stream);
    assert_eq!(requests[0].model, "mock-model");
    assert_eq!(requests[0].max_tokens, 256);
    assert!(requests[0].messages[0].content.contains(r#""cmd""#));
}

#[tokio::test]
async fn test_exec_completion_unstructured_reply_is_not_an_error() {
    let (provider, mut engine, _events) = mock_engine(Mode::Exec);
    provider.push_completion("I cannot help with that");

    let result = engine.exec_completion("make me a sandwich").await.unwrap();

    assert_eq!(result.command, "");
    assert_eq!(result.explanation, "I cannot help with that");
    assert!(!result.executable);
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_exec_completion_transport_error_clears_running() {
    let (provider, mut engine, _events) = mock_engine(Mode::Exec);
    provider.push_completion_error("connection refused");

    let error = engine.exec_completion("uptime").await.unwrap_err();

    assert!(matches!(
        error,
        EngineError::Provider(ref e) if e.kind == ProviderErrorKind::Network
    ));
    assert!(!engine.is_running());
    assert_eq!(contents(engine.history(Mode::Exec)), vec!["uptime"]);
}

#[tokio::test]
async fn test_completion_while_running_is_busy() {
    let (provider, mut engine, mut events) = mock_engine(Mode::Exec);
    provider.push_completion(r#"{"cmd":"ls","exp":"","exec":true}"#);

    let gate = Arc::clone(&engine.gate);
    let held = gate.begin(Phase::Blocking).unwrap();
    assert!(engine.is_running());
    assert!(!engine.interrupt(), "blocking calls cannot be interrupted");
    assert!(matches!(
        engine.exec_completion("ls").await,
        Err(EngineError::Busy)
    ));
    assert!(matches!(
        engine.chat_stream_completion("ls").await,
        Err(EngineError::Busy)
    ));
    assert!(engine.history(Mode::Exec).is_empty());
    assert!(drain(&mut events).is_empty());

    drop(held);
    assert!(engine.exec_completion("ls").await.is_ok());
}

#[tokio::test]
async fn test_stream_forwards_deltas_then_one_final_event() {
    let (provider, mut engine, mut events) = mock_engine(Mode::Chat);
    provider.push_stream(MockStream::chunks(["The answer ", "is `4`"]));

    engine.chat_stream_completion("what is 2+2").await.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            StreamEvent::delta("The answer "),
            StreamEvent::delta("is `4`"),
            StreamEvent::finished(false),
        ]
    );
    assert_eq!(
        contents(engine.history(Mode::Chat)),
        vec!["what is 2+2", "The answer is `4`"]
    );
    assert!(provider.requests()[0].stream);
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_stream_closed_without_done_still_finishes() {
    let (provider, mut engine, mut events) = mock_engine(Mode::Exec);
    provider.push_stream(MockStream::without_done(["ls ", "-la"]));

    engine.chat_stream_completion("list everything").await.unwrap();

    let drained = drain(&mut events);
    assert_eq!(drained.len(), 3);
    assert_eq!(drained.last(), Some(&StreamEvent::finished(true)));
    assert_eq!(drained.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_exec_stream_executable_flag_follows_output_shape() {
    let cases = [
        (vec!["docker ps -a"], true),
        (vec!["[noexec] ", "I need more details"], false),
        (vec!["first line\n", "second line"], false),
    ];

    for (chunks, expected) in cases {
        let (provider, mut engine, mut events) = mock_engine(Mode::Exec);
        provider.push_stream(MockStream::chunks(chunks.clone()));
        engine.chat_stream_completion("do it").await.unwrap();
        let last = drain(&mut events).pop().unwrap();
        assert!(last.is_final, "{chunks:?}");
        assert_eq!(last.is_executable, expected, "{chunks:?}");
    }
}

#[tokio::test]
async fn test_stream_open_failure_is_returned_and_clears_running() {
    let (provider, mut engine, mut events) = mock_engine(Mode::Chat);
    provider.push_stream(MockStream::Fail("dns failure".to_string()));

    let result = engine.chat_stream_completion("hello").await;

    assert!(matches!(result, Err(EngineError::Provider(_))));
    assert!(!engine.is_running());
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_interrupt_mid_stream_emits_single_interrupted_event() {
    let (provider, mut engine, mut events) = mock_engine(Mode::Chat);
    let (live, chunk_tx) = MockStream::live();
    provider.push_stream(live);
    let handle = engine.interrupt_handle();

    let driver = async {
        chunk_tx.send(StreamEvent::delta("Hel")).await.unwrap();
        assert_eq!(events.recv().await, Some(StreamEvent::delta("Hel")));

        assert!(handle.interrupt());
        assert!(!handle.is_running(), "an interrupted call is no longer running");
        assert!(!handle.interrupt(), "second interrupt is a no-op");

        // The producer may keep going; nothing more is forwarded.
        let _ = chunk_tx.send(StreamEvent::delta("lo")).await;
        let _ = chunk_tx.send(StreamEvent::done()).await;
    };

    let (result, ()) = tokio::join!(engine.chat_stream_completion("greet me"), driver);
    result.unwrap();

    assert_eq!(drain(&mut events), vec![StreamEvent::interrupted()]);
    assert_eq!(
        contents(engine.history(Mode::Chat)),
        vec!["greet me", "Hel"]
    );
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_interrupt_releases_a_stalled_stream() {
    let (provider, mut engine, mut events) = mock_engine(Mode::Chat);
    let (live, chunk_tx) = MockStream::live();
    provider.push_stream(live);
    let handle = engine.interrupt_handle();

    let driver = async {
        while !handle.is_running() {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;
        assert!(handle.interrupt());
    };

    let (result, ()) = tokio::join!(engine.chat_stream_completion("hang"), driver);
    result.unwrap();

    assert_eq!(drain(&mut events), vec![StreamEvent::interrupted()]);
    assert_eq!(contents(engine.history(Mode::Chat)), vec!["hang"]);
    assert!(chunk_tx.is_closed());
}

#[tokio::test]
async fn test_interrupt_while_opening_returns_without_waiting_for_provider() {
    let (provider, mut engine, mut events) = mock_engine(Mode::Chat);
    provider.push_stream(MockStream::Hang);
    let handle = engine.interrupt_handle();

    let driver = async {
        while !handle.is_running() {
            tokio::task::yield_now().await;
        }
        assert!(handle.interrupt());
    };

    let (result, ()) = tokio::join!(engine.chat_stream_completion("slow server"), driver);
    result.unwrap();

    assert_eq!(drain(&mut events), vec![StreamEvent::interrupted()]);
    assert_eq!(contents(engine.history(Mode::Chat)), vec!["slow server"]);
    assert!(!engine.is_running());
}

#[test]
fn test_interrupt_while_idle_is_a_no_op() {
    let (_provider, engine, mut events) = mock_engine(Mode::Chat);
    assert!(!engine.interrupt());
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_shared_context_reaches_first_request_after_switch() {
    let (provider, mut engine, _events) = mock_engine(Mode::Exec);
    provider
        .push_completion(r#"{"cmd":"df -h","exp":"disk usage","exec":true}"#)
        .push_stream(MockStream::chunks(["It shows disk usage."]))
        .push_stream(MockStream::chunks(["Sure."]));

    engine.exec_completion("show disk usage").await.unwrap();
    engine.set_mode(Mode::Chat);
    engine.add_terminal_output(
        "Switched from exec mode to chat mode. Context from previous conversation was preserved.",
    );
    engine.chat_stream_completion("explain that").await.unwrap();
    engine.chat_stream_completion("thanks").await.unwrap();

    let requests = provider.requests();
    let first_chat = contents(&requests[1].messages);
    assert!(first_chat.contains(&"Here is recent context from command mode that might be relevant:"));
    assert!(first_chat.contains(&"show disk usage"));
    assert_eq!(first_chat.last(), Some(&"explain that"));

    let second_chat = contents(&requests[2].messages);
    assert!(!second_chat.contains(&"show disk usage"));
    assert_eq!(
        &second_chat[second_chat.len() - 3..],
        &["explain that", "It shows disk usage.", "thanks"]
    );
}

#[test]
fn test_from_config_rejects_unknown_provider() {
    let mut config = test_config(Mode::Exec);
    config.ai.provider = "mistral".to_string();

    let error = ConversationEngine::from_config(&config).err().unwrap();
    assert!(matches!(
        error,
        EngineError::Provider(ref e) if e.kind == ProviderErrorKind::UnsupportedProvider
    ));
}

#[test]
fn test_new_falls_back_to_provider_default_model() {
    let mut config = test_config(Mode::Exec);
    config.ai.model = String::new();
    let provider = MockProvider::new(ProviderKind::Claude);
    let (engine, _events) = ConversationEngine::new(Box::new(provider), &config);
    assert_eq!(engine.model(), "claude-3-haiku-20240307");
    assert_eq!(engine.provider_kind(), ProviderKind::Claude);
}
