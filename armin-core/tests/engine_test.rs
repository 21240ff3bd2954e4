use armin_core::engine::STEPS_PREFIX;
use armin_core::{
    ConversationEngine, EngineEvent, EngineOptions, FileInput, Phase, PersonaCatalog,
    RejectReason, SendOutcome,
};
use async_trait::async_trait;
use config::Settings;
use futures::channel::{mpsc, oneshot};
use llm::{
    ChatChunk, ChatMessage, ChatPayload, CompletionStream, ContentBlock, GeneratedImage,
    GenerationClient, GenerationError, Source,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

type ChunkSender = mpsc::UnboundedSender<Result<ChatChunk, GenerationError>>;
type ImageReply = oneshot::Sender<Result<GeneratedImage, GenerationError>>;

/// Backend whose streams and image results are fed by the test
#[derive(Default)]
struct ScriptedClient {
    streams: Mutex<VecDeque<Result<CompletionStream, GenerationError>>>,
    image_replies: Mutex<VecDeque<oneshot::Receiver<Result<GeneratedImage, GenerationError>>>>,
    explanation: Mutex<Option<Result<String, GenerationError>>>,
    held_explanation: Mutex<Option<oneshot::Receiver<Result<String, GenerationError>>>>,
    histories: Mutex<Vec<Vec<ChatMessage>>>,
    system_prompts: Mutex<Vec<String>>,
    models: Mutex<Vec<String>>,
    image_prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn script_stream(&self) -> ChunkSender {
        let (tx, rx) = mpsc::unbounded();
        self.streams
            .lock()
            .push_back(Ok(CompletionStream::new(Box::pin(rx))));
        tx
    }

    fn script_open_failure(&self, error: GenerationError) {
        self.streams.lock().push_back(Err(error));
    }

    /// Hold the next explanation until the returned sender resolves it
    fn script_explanation(&self) -> oneshot::Sender<Result<String, GenerationError>> {
        let (tx, rx) = oneshot::channel();
        *self.held_explanation.lock() = Some(rx);
        tx
    }

    fn script_image(&self) -> ImageReply {
        let (tx, rx) = oneshot::channel();
        self.image_replies.lock().push_back(rx);
        tx
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn stream_completion(
        &self,
        model: &str,
        history: &[ChatMessage],
        system_instruction: &str,
        _settings: &Settings,
    ) -> Result<CompletionStream, GenerationError> {
        self.histories.lock().push(history.to_vec());
        self.system_prompts.lock().push(system_instruction.to_string());
        self.models.lock().push(model.to_string());
        self.streams
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::unknown("no scripted stream")))
    }

    async fn generate_image(
        &self,
        prompt: &str,
        _settings: &Settings,
    ) -> Result<GeneratedImage, GenerationError> {
        self.image_prompts.lock().push(prompt.to_string());
        let reply = self.image_replies.lock().pop_front();
        match reply {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(GenerationError::unknown("reply dropped"))),
            None => Ok(GeneratedImage::from_inline("image/png", "AAAA")),
        }
    }

    async fn analyze_content(
        &self,
        files: &[ContentBlock],
        prompt: &str,
        _model: &str,
        _system_instruction: &str,
        _settings: &Settings,
    ) -> Result<String, GenerationError> {
        Ok(format!("{} files: {}", files.len(), prompt))
    }

    async fn explain_steps(
        &self,
        question: &str,
        answer: &str,
        _model: &str,
        _settings: &Settings,
    ) -> Result<String, GenerationError> {
        let held = self.held_explanation.lock().take();
        if let Some(rx) = held {
            return rx
                .await
                .unwrap_or_else(|_| Err(GenerationError::unknown("reply dropped")));
        }
        self.explanation
            .lock()
            .take()
            .unwrap_or_else(|| Ok(format!("{} -> {}", question, answer)))
    }
}

struct Harness {
    engine: ConversationEngine,
    client: Arc<ScriptedClient>,
    settings: watch::Sender<Settings>,
    events: broadcast::Receiver<EngineEvent>,
}

fn harness() -> Harness {
    let client = Arc::new(ScriptedClient::default());
    let (settings, rx) = watch::channel(Settings::default());
    let engine = ConversationEngine::with_options(
        client.clone(),
        rx,
        PersonaCatalog::builtin(),
        EngineOptions::default(),
    );
    let events = engine.subscribe();
    Harness {
        engine,
        client,
        settings,
        events,
    }
}

fn chunk(text: &str) -> Result<ChatChunk, GenerationError> {
    Ok(ChatChunk::assistant(ChatPayload::text(text)))
}

async fn wait_event(
    events: &mut broadcast::Receiver<EngineEvent>,
    pred: impl Fn(&EngineEvent) -> bool,
) -> EngineEvent {
    loop {
        let event = events.recv().await.unwrap();
        if pred(&event) {
            return event;
        }
    }
}

async fn wait_phase(engine: &ConversationEngine, phase: Phase) {
    let mut rx = engine.watch_phase();
    rx.wait_for(|p| *p == phase).await.unwrap();
}

fn contents(engine: &ConversationEngine) -> Vec<String> {
    engine.messages().into_iter().map(|m| m.content).collect()
}

/// Run one full exchange whose reply is buffered up front
async fn exchange(h: &Harness, prompt: &str, reply: &str) {
    let tx = h.client.script_stream();
    tx.unbounded_send(chunk(reply)).unwrap();
    drop(tx);
    assert!(matches!(h.engine.send(prompt).await, SendOutcome::Completed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_streamed_exchange_completes() {
    let mut h = harness();
    let tx = h.client.script_stream();

    let engine = h.engine.clone();
    let task = tokio::spawn(async move { engine.send("What is DNA?").await });

    wait_phase(&h.engine, Phase::Streaming).await;
    let messages = h.engine.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].is_streaming);
    assert!(messages[1].content.is_empty());

    tx.unbounded_send(chunk("DNA is ")).unwrap();
    tx.unbounded_send(chunk("a molecule.")).unwrap();
    drop(tx);

    let id = match task.await.unwrap() {
        SendOutcome::Completed(id) => id,
        other => panic!("unexpected outcome {:?}", other),
    };
    wait_event(&mut h.events, |e| matches!(e, EngineEvent::Completed { .. })).await;

    let messages = h.engine.messages();
    assert_eq!(messages[1].id, id);
    assert_eq!(messages[1].content, "DNA is a molecule.");
    assert!(!messages[1].is_streaming);
    assert!(!messages[1].is_error);
    assert_eq!(h.engine.phase(), Phase::Idle);

    // History is the log minus the placeholder
    let histories = h.client.histories.lock();
    assert_eq!(histories[0].len(), 1);
    assert_eq!(histories[0][0].get_text(), "What is DNA?");
}

#[tokio::test(start_paused = true)]
async fn test_thinking_delay_always_elapses() {
    let h = harness();
    let tx = h.client.script_stream();
    drop(tx);

    let start = tokio::time::Instant::now();
    h.engine.send("hi").await;
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_sources_deduplicated_at_completion() {
    let h = harness();
    let tx = h.client.script_stream();
    tx.unbounded_send(Ok(ChatChunk::assistant(ChatPayload::text("one "))
        .with_sources(vec![Source::new("a", "X"), Source::new("a", "Y")])))
        .unwrap();
    tx.unbounded_send(Ok(ChatChunk::assistant(ChatPayload::text("two"))
        .with_sources(vec![Source::new("b", "Z")])))
        .unwrap();
    drop(tx);

    h.engine.send("cite").await;
    assert_eq!(
        h.engine.messages()[1].sources,
        vec![Source::new("a", "X"), Source::new("b", "Z")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_partial_content() {
    let mut h = harness();
    let tx = h.client.script_stream();

    let engine = h.engine.clone();
    let task = tokio::spawn(async move { engine.send("Tell me a story").await });

    wait_phase(&h.engine, Phase::Streaming).await;
    tx.unbounded_send(chunk("Once upon")).unwrap();
    wait_event(&mut h.events, |e| matches!(e, EngineEvent::Chunk { .. })).await;

    assert!(h.engine.cancel());
    let placeholder = h.engine.messages()[1].clone();
    assert!(!placeholder.is_streaming);
    assert!(!placeholder.is_error);
    assert_eq!(placeholder.content, "Once upon");

    // Anything arriving after the cancel is never applied
    let _ = tx.unbounded_send(chunk(" a time"));
    assert_eq!(
        task.await.unwrap(),
        SendOutcome::Cancelled(Some(placeholder.id))
    );
    assert_eq!(h.engine.messages()[1].content, "Once upon");
    assert_eq!(h.engine.phase(), Phase::Idle);
    assert!(h.engine.notifications().current().is_none());

    // Idempotent once nothing is in flight
    assert!(!h.engine.cancel());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_thinking_delay() {
    let h = harness();
    let _tx = h.client.script_stream();

    let engine = h.engine.clone();
    let task = tokio::spawn(async move { engine.send("hello").await });

    wait_phase(&h.engine, Phase::ThinkingDelay).await;
    assert!(h.engine.cancel());
    assert_eq!(task.await.unwrap(), SendOutcome::Cancelled(None));

    assert_eq!(contents(&h.engine), vec!["hello"]);
    assert!(h.client.histories.lock().is_empty());
    assert_eq!(h.engine.phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_send_while_busy_is_rejected() {
    let h = harness();
    let tx = h.client.script_stream();

    let engine = h.engine.clone();
    let task = tokio::spawn(async move { engine.send("first").await });
    wait_phase(&h.engine, Phase::Streaming).await;

    assert_eq!(
        h.engine.send("second").await,
        SendOutcome::Rejected(RejectReason::Busy)
    );
    assert_eq!(h.engine.messages().len(), 2);
    assert_eq!(h.engine.regenerate_explanation(1).await, None);

    drop(tx);
    assert!(matches!(task.await.unwrap(), SendOutcome::Completed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_empty_send_leaves_log_unchanged() {
    let h = harness();
    exchange(&h, "A", "B").await;

    assert_eq!(
        h.engine.send("").await,
        SendOutcome::Rejected(RejectReason::Empty)
    );
    assert_eq!(h.engine.messages().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_attachment_only_send_uses_draft() {
    let h = harness();
    h.engine
        .attach(&[FileInput::new("cell.png", "image/png", vec![1, 2, 3])]);
    exchange(&h, "", "A picture of a cell").await;

    let messages = h.engine.messages();
    assert_eq!(messages[0].attachments.len(), 1);
    assert!(h.engine.draft().attachments.is_empty());

    let histories = h.client.histories.lock();
    assert_eq!(histories[0][0].payload.get_images(), vec![("AQID", "image/png")]);
}

#[tokio::test(start_paused = true)]
async fn test_edit_replaces_last_exchange() {
    let h = harness();
    exchange(&h, "A", "B").await;
    exchange(&h, "C", "D").await;

    let tx = h.client.script_stream();
    let engine = h.engine.clone();
    let task = tokio::spawn(async move { engine.edit("E").await });
    wait_phase(&h.engine, Phase::Streaming).await;

    let messages = h.engine.messages();
    assert_eq!(contents(&h.engine), vec!["A", "B", "E", ""]);
    assert!(messages[3].is_streaming);

    let history: Vec<String> = h.client.histories.lock()[2]
        .iter()
        .map(|m| m.get_text())
        .collect();
    assert_eq!(history, vec!["A", "B", "E"]);

    drop(tx);
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_persona_switch_resets_log() {
    let mut h = harness();
    exchange(&h, "A", "B").await;
    exchange(&h, "C", "D").await;
    assert_eq!(h.engine.messages().len(), 4);

    let persona = h.engine.select_persona("physicist").unwrap();
    assert!(h.engine.messages().is_empty());
    wait_event(&mut h.events, |e| matches!(e, EngineEvent::LogReset)).await;

    exchange(&h, "What is entropy?", "Disorder.").await;
    let prompts = h.client.system_prompts.lock();
    assert_eq!(prompts.last(), Some(&persona.system_prompt));
    assert!(persona.system_prompt.contains("physicist"));
}

#[tokio::test(start_paused = true)]
async fn test_directive_dispatches_exactly_one_image() {
    let mut h = harness();
    let tx = h.client.script_stream();
    let image = h.client.script_image();

    let engine = h.engine.clone();
    let task = tokio::spawn(async move { engine.send("Explain cells").await });
    wait_phase(&h.engine, Phase::Streaming).await;

    tx.unbounded_send(chunk("Look:\n<<GENERATE_IMAGE: a ce")).unwrap();
    wait_event(&mut h.events, |e| matches!(e, EngineEvent::Chunk { .. })).await;
    assert!(!h.engine.messages()[1].image_pending());

    tx.unbounded_send(chunk("ll>>\nCells are")).unwrap();
    wait_event(&mut h.events, |e| matches!(e, EngineEvent::Chunk { .. })).await;
    assert!(h.engine.messages()[1].image_pending());

    tx.unbounded_send(chunk(" small.")).unwrap();
    wait_event(&mut h.events, |e| matches!(e, EngineEvent::Chunk { .. })).await;
    drop(tx);
    assert!(matches!(task.await.unwrap(), SendOutcome::Completed(_)));

    // The image resolves after the text stream has finished
    let before = h.engine.messages()[1].clone();
    image
        .send(Ok(GeneratedImage::from_inline("image/png", "IMG")))
        .unwrap();
    h.engine.settle().await;

    let after = h.engine.messages()[1].clone();
    assert_eq!(
        *h.client.image_prompts.lock(),
        vec!["a cell . photorealistic, 8k, cinematic, educational, highly detailed".to_string()]
    );
    assert_eq!(after.images(), ["data:image/png;base64,IMG".to_string()]);
    assert!(!after.image_error());
    assert_eq!(after.content, before.content);
    assert_eq!(after.sources, before.sources);
    assert!(!after.is_streaming);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_image_is_not_relayed() {
    let h = harness();
    let image = h.client.script_image();
    image.send(Err(GenerationError::RateLimited)).unwrap();
    exchange(&h, "draw", "<<GENERATE_IMAGE: a graph>>").await;
    h.engine.settle().await;

    let message = h.engine.messages()[1].clone();
    assert!(message.image_error());
    assert!(message.images().is_empty());
    assert!(h.engine.notifications().current().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_other_image_failure_is_relayed_once() {
    let h = harness();
    let image = h.client.script_image();
    image.send(Err(GenerationError::SafetyBlocked)).unwrap();
    exchange(&h, "draw", "<<GENERATE_IMAGE: a graph>>").await;
    h.engine.settle().await;

    assert!(h.engine.messages()[1].image_error());
    let notice = h.engine.notifications().current().unwrap();
    assert!(notice.message.starts_with("Automatic image generation failed"));
    assert!(notice.message.ends_with(&GenerationError::SafetyBlocked.user_message()));
    assert_eq!(h.client.image_prompts.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_marks_entry() {
    let h = harness();
    let tx = h.client.script_stream();
    tx.unbounded_send(chunk("partial")).unwrap();
    tx.unbounded_send(Err(GenerationError::SafetyBlocked)).unwrap();

    let outcome = h.engine.send("something").await;
    assert!(matches!(
        outcome,
        SendOutcome::Failed {
            error: GenerationError::SafetyBlocked,
            ..
        }
    ));

    let message = h.engine.messages()[1].clone();
    assert!(message.is_error);
    assert!(!message.is_streaming);
    assert_eq!(message.content, GenerationError::SafetyBlocked.user_message());
    assert_eq!(
        h.engine.notifications().current().map(|n| n.message),
        Some(GenerationError::SafetyBlocked.user_message())
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_credential_marks_entry() {
    let h = harness();
    h.client.script_open_failure(GenerationError::AuthMissing);

    let outcome = h.engine.send("hi").await;
    assert!(matches!(
        outcome,
        SendOutcome::Failed {
            error: GenerationError::AuthMissing,
            ..
        }
    ));
    assert!(h.engine.messages()[1].is_error);
    assert_eq!(h.engine.phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_explanation_appends_new_entry() {
    let h = harness();
    exchange(&h, "2+2?", "4").await;

    assert_eq!(h.engine.regenerate_explanation(0).await, None);
    assert_eq!(h.engine.regenerate_explanation(7).await, None);
    assert_eq!(h.engine.messages().len(), 2);

    let id = h.engine.regenerate_explanation(1).await.unwrap();
    let messages = h.engine.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2].id, id);
    assert_eq!(messages[2].content, format!("{}2+2? -> 4", STEPS_PREFIX));
    assert_eq!(messages[1].content, "4");
}

#[tokio::test(start_paused = true)]
async fn test_explanation_failure_is_relayed() {
    let h = harness();
    exchange(&h, "q", "a").await;
    *h.client.explanation.lock() = Some(Err(GenerationError::ModelNotFound));

    assert_eq!(h.engine.regenerate_explanation(1).await, None);
    assert_eq!(h.engine.messages().len(), 2);
    assert!(h.engine.notifications().current().is_some());
    assert_eq!(h.engine.phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_persona_switch_abandons_explanation() {
    let h = harness();
    exchange(&h, "old question", "old answer").await;
    let reply = h.client.script_explanation();

    let engine = h.engine.clone();
    let task = tokio::spawn(async move { engine.regenerate_explanation(1).await });
    wait_phase(&h.engine, Phase::Explaining).await;

    h.engine.select_persona("historian").unwrap();
    assert!(h.engine.messages().is_empty());
    assert_eq!(task.await.unwrap(), None);
    assert_eq!(h.engine.phase(), Phase::Idle);

    // The backend answering late must not reach the new conversation
    let _ = reply.send(Ok("steps for old question".into()));
    tokio::task::yield_now().await;
    assert!(h.engine.messages().is_empty());

    exchange(&h, "new question", "new answer").await;
    assert_eq!(contents(&h.engine), vec!["new question", "new answer"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_explanation() {
    let h = harness();
    exchange(&h, "q", "a").await;
    let _reply = h.client.script_explanation();

    let engine = h.engine.clone();
    let task = tokio::spawn(async move { engine.regenerate_explanation(1).await });
    wait_phase(&h.engine, Phase::Explaining).await;

    assert!(h.engine.cancel());
    assert_eq!(task.await.unwrap(), None);
    assert_eq!(h.engine.messages().len(), 2);
    assert_eq!(h.engine.phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_settings_change_applies_to_next_exchange() {
    let h = harness();
    exchange(&h, "one", "1").await;
    h.settings
        .send_modify(|s| s.model = "gemini-3-pro-preview".to_string());
    exchange(&h, "two", "2").await;

    let models = h.client.models.lock();
    assert_eq!(models[0], config::DEFAULT_MODEL);
    assert_eq!(models[1], "gemini-3-pro-preview");
}

#[tokio::test(start_paused = true)]
async fn test_explain_code_goes_through_send() {
    let h = harness();
    let tx = h.client.script_stream();
    drop(tx);

    assert!(matches!(
        h.engine.explain_code(Some("rust"), "let x = 1;").await,
        SendOutcome::Completed(_)
    ));
    assert!(h.engine.messages()[0].content.contains("```rust\nlet x = 1;\n```"));
}

#[tokio::test(start_paused = true)]
async fn test_studio_calls() {
    let h = harness();
    let attachment = armin_core::attachment::encode(&FileInput::new("a.txt", "text/plain", b"x".to_vec()))
        .unwrap();

    let text = h.engine.analyze_files(&[attachment.clone()], "").await.unwrap();
    assert_eq!(text, "1 files: Please analyze these 1 files.");

    assert!(h.engine.analyze_image(&attachment, "").await.is_err());
    assert!(h.engine.notifications().current().is_some());

    assert_eq!(h.engine.generate_image("  ").await, Ok(None));
    let image = h.engine.generate_image("a volcano").await.unwrap().unwrap();
    assert_eq!(image.uri, "data:image/png;base64,AAAA");
    assert!(h.client.image_prompts.lock()[0].starts_with("a volcano . Style: Photorealistic"));
    // Studio output never touches the conversation
    assert!(h.engine.messages().is_empty());
}
