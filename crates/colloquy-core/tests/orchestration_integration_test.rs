mod common;

use colloquy_core::tools::{DeclaredType, FnTool, Signature, DEPRECATED_TOOL_MESSAGE};
use colloquy_core::{
    Audience, ChatError, Conversation, ConversationState, InlineExecutor, Message, Orchestrator,
    PooledExecutor, SpinStop, Tool, ToolChoice, ToolDispatcher, ToolSet, Transition, UserMessage,
};
use common::{tools, MockProvider};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn pooled(provider: MockProvider, timeout: Duration) -> Orchestrator {
    let executor = Arc::new(PooledExecutor::new(4, timeout));
    Orchestrator::new(Arc::new(provider), ToolDispatcher::new(executor))
}

fn ask(question: &str, tools: &ToolSet) -> Conversation {
    let mut conversation = Conversation::new("You are a helper.");
    conversation
        .append(
            UserMessage::new(question)
                .with_tools(tools.refs())
                .with_tool_choice(ToolChoice::Auto),
        )
        .unwrap();
    conversation
}

#[tokio::test]
async fn test_find_x_scenario() {
    let provider = MockProvider::new()
        .tool_call("search", json!({"query": "X"}))
        .text("X is 42.");
    let orchestrator = pooled(provider.clone(), Duration::from_secs(5));
    let mut conversation = ask("find X", &tools());

    let mut transitions = Vec::new();
    for _ in 0..4 {
        transitions.push(orchestrator.complete(&mut conversation, 1024).await.unwrap());
    }
    assert_eq!(
        transitions,
        vec![
            Transition::ProviderReplied,
            Transition::ToolDispatched,
            Transition::ProviderReplied,
            Transition::Unchanged
        ]
    );

    let roles: Vec<_> = conversation.messages().iter().map(Message::role).collect();
    assert_eq!(roles.len(), 4);
    match &conversation.messages()[2] {
        Message::Tool(m) => {
            assert_eq!(m.for_whom, Audience::Assistant);
            assert_eq!(m.tool_name, "search");
        }
        other => panic!("expected tool message, got {:?}", other),
    }
    assert_eq!(conversation.last().unwrap().content(), "X is 42.");
    assert_eq!(conversation.state(), ConversationState::Terminal);
    assert_eq!(provider.offered()[0], vec!["search", "stall"]);
}

#[tokio::test]
async fn test_tool_call_ceiling() {
    let mut provider = MockProvider::new();
    for _ in 0..20 {
        provider = provider.tool_call("search", json!({"query": "more"}));
    }
    let orchestrator = pooled(provider.clone(), Duration::from_secs(5));
    let mut conversation = ask("find everything", &tools());

    let mut snapshots = 0;
    let outcome = orchestrator
        .spin(&mut conversation, 4, &mut |_: &Conversation| snapshots += 1, 1024)
        .await
        .unwrap();

    assert_eq!(outcome.stop, SpinStop::ToolCallLimit);
    assert_eq!(outcome.tool_calls, 4);
    assert_eq!(snapshots, outcome.steps);
    assert_eq!(provider.calls(), 5);
    assert_eq!(provider.offered()[4], Vec::<String>::new());
    assert_eq!(conversation.state(), ConversationState::Terminal);
    conversation.append(UserMessage::new("thanks")).unwrap();
}

#[tokio::test]
async fn test_timeout_is_contained() {
    let stalled = MockProvider::new()
        .tool_call("stall", json!({}))
        .text("The tool timed out.");
    let quick = MockProvider::new()
        .tool_call("search", json!({"query": "Y"}))
        .text("Y is 42.");

    // Two sessions sharing one pool.
    let executor = Arc::new(PooledExecutor::new(2, Duration::from_millis(200)));
    let slow_session = Orchestrator::new(Arc::new(stalled), ToolDispatcher::new(executor.clone()));
    let fast_session = Orchestrator::new(Arc::new(quick), ToolDispatcher::new(executor.clone()));

    let toolset = tools();
    let mut slow_conversation = ask("wait", &toolset);
    let mut fast_conversation = ask("find Y", &toolset);

    let mut slow_deliver = |_: &Conversation| {};
    let mut fast_deliver = |_: &Conversation| {};
    let started = Instant::now();
    let (slow, fast) = tokio::join!(
        slow_session.spin(&mut slow_conversation, 5, &mut slow_deliver, 256),
        fast_session.spin(&mut fast_conversation, 5, &mut fast_deliver, 256),
    );
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(slow.unwrap().stop, SpinStop::Terminal);
    assert_eq!(fast.unwrap().stop, SpinStop::Terminal);

    match &slow_conversation.messages()[2] {
        Message::Tool(m) => assert!(m.result.get("timeout").is_some()),
        other => panic!("expected tool message, got {:?}", other),
    }
    assert_eq!(slow_conversation.last().unwrap().content(), "The tool timed out.");
    assert_eq!(fast_conversation.last().unwrap().content(), "Y is 42.");
    assert_eq!(executor.available_slots(), 2);
}

#[tokio::test]
async fn test_unknown_tool_is_reported_to_model() {
    let provider = MockProvider::new()
        .tool_call("nonexistent", json!({}))
        .text("Sorry, I cannot do that.");
    let orchestrator = pooled(provider, Duration::from_secs(5));
    let mut conversation = ask("do something", &tools());

    orchestrator
        .spin(&mut conversation, 5, &mut |_: &Conversation| {}, 256)
        .await
        .unwrap();

    match &conversation.messages()[2] {
        Message::Tool(m) => {
            assert_eq!(m.for_whom, Audience::Assistant);
            assert!(m.result["validation_error"]
                .as_str()
                .unwrap()
                .contains("nonexistent"));
        }
        other => panic!("expected tool message, got {:?}", other),
    }
    assert_eq!(conversation.len(), 4);
}

#[tokio::test]
async fn test_terminal_conversation_is_idempotent() {
    let provider = MockProvider::new().text("Hello!");
    let orchestrator = pooled(provider.clone(), Duration::from_secs(5));
    let mut conversation = ask("hi", &tools());

    orchestrator
        .spin(&mut conversation, 5, &mut |_: &Conversation| {}, 256)
        .await
        .unwrap();
    let before = serde_json::to_value(&conversation).unwrap();

    for _ in 0..3 {
        let transition = orchestrator.complete(&mut conversation, 256).await.unwrap();
        assert_eq!(transition, Transition::Unchanged);
    }
    assert_eq!(serde_json::to_value(&conversation).unwrap(), before);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_round_trip_and_rebind() {
    let provider = MockProvider::new()
        .tool_call("search", json!({"query": "X"}))
        .text("X is 42.");
    let orchestrator = pooled(provider, Duration::from_secs(5));
    let mut conversation = ask("find X", &tools());
    orchestrator
        .spin(&mut conversation, 5, &mut |_: &Conversation| {}, 256)
        .await
        .unwrap();

    let json = serde_json::to_string(&conversation).unwrap();
    assert!(!json.contains("binding"));
    let mut restored: Conversation = serde_json::from_str(&json).unwrap();

    assert_eq!(restored.system, conversation.system);
    assert_eq!(restored.len(), conversation.len());
    for (a, b) in restored.messages().iter().zip(conversation.messages()) {
        assert_eq!(a.id(), b.id());
        assert_eq!(a.role(), b.role());
        assert_eq!(a.content(), b.content());
    }
    assert!(restored.messages()[0].tools()[0].binding().is_none());

    // Only `search` survives into the new session.
    let mut search_only = ToolSet::new();
    search_only.register(replacement_search()).unwrap();
    restored.rebind_tools(&search_only);

    let refs = restored.messages()[0].tools();
    let search = refs.iter().find(|t| t.name() == "search").unwrap();
    let stall = refs.iter().find(|t| t.name() == "stall").unwrap();
    assert!(search.binding().is_some());
    let stand_in = stall.binding().unwrap().clone();
    let result = stand_in.try_call(serde_json::Map::new()).await.unwrap();
    assert_eq!(result, json!({"exception": DEPRECATED_TOOL_MESSAGE}));
}

fn replacement_search() -> Tool {
    let function = FnTool::new(
        Signature::new("search").param("query", DeclaredType::String),
        |_| async { Ok(json!([])) },
    );
    Tool::builder(function)
        .description("Search the knowledge base")
        .parameter("query", "Search terms")
        .build()
        .unwrap()
}

#[test]
fn test_alternation_is_enforced() {
    let mut conversation = Conversation::new("sys");
    conversation.append(UserMessage::new("one")).unwrap();
    let err = conversation.append(UserMessage::new("two")).unwrap_err();
    assert!(matches!(err, ChatError::InvariantViolation(_)));
    assert_eq!(conversation.len(), 1);

    let stored = json!({
        "system": "sys",
        "messages": [
            {"role": "assistant", "content": "a", "stop_reason": "end_turn"},
            {"role": "assistant", "content": "b", "stop_reason": "end_turn"}
        ]
    });
    assert!(serde_json::from_value::<Conversation>(stored).is_err());
}

#[tokio::test]
async fn test_inline_executor_matches_pooled_behavior() {
    let provider = MockProvider::new()
        .tool_call("stall", json!({}))
        .text("done");
    let dispatcher = ToolDispatcher::new(Arc::new(InlineExecutor::new(Duration::from_millis(50))));
    let orchestrator = Orchestrator::new(Arc::new(provider), dispatcher);
    let mut conversation = ask("wait", &tools());

    orchestrator
        .spin(&mut conversation, 5, &mut |_: &Conversation| {}, 256)
        .await
        .unwrap();
    match &conversation.messages()[2] {
        Message::Tool(m) => assert!(m.result.get("timeout").is_some()),
        other => panic!("expected tool message, got {:?}", other),
    }
}
