use config::Settings;
use llm::{GenerationClient, GenerationError, StreamStep};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::attachment::{self, FileInput};
use crate::conversation::ConversationLog;
use crate::export::{self, ExportArtifact, ExportFormat};
use crate::markers::{detect_image_directive, explain_code_prompt};
use crate::message::{Attachment, ImageState, Message, MessageId, MessageRole};
use crate::notify::NotificationRelay;
use crate::persona::{Persona, PersonaCatalog};
use crate::speech::{SpeechError, SpeechRecognizer, UnavailableRecognizer};

/// Visible "deep thought" pause before every stream
pub const THINKING_DELAY: Duration = Duration::from_secs(2);

/// Appended to every auto-image prompt
pub const AUTO_IMAGE_STYLE: &str = " . photorealistic, 8k, cinematic, educational, highly detailed";

pub const STEPS_PREFIX: &str = "🔍 **Step-by-step analysis:**\n\n";

const EVENT_CAPACITY: usize = 256;

/// Where the single in-flight exchange currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Drafting,
    ThinkingDelay,
    Streaming,
    Explaining,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    UserMessageAdded(Message),
    PhaseChanged(Phase),
    /// A model entry was appended (stream placeholder or explanation)
    MessageAppended(Message),
    Chunk { id: MessageId, delta: String },
    ImageReady { id: MessageId, uri: String },
    ImageFailed { id: MessageId, error: GenerationError },
    Completed { id: MessageId },
    Failed { id: MessageId, error: GenerationError },
    Cancelled { id: Option<MessageId> },
    LogReset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// No text and no attachments
    Empty,
    /// Another exchange is in flight
    Busy,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SendOutcome {
    Rejected(RejectReason),
    Completed(MessageId),
    Failed { id: MessageId, error: GenerationError },
    /// `None` when cancelled before the placeholder existed
    Cancelled(Option<MessageId>),
}

#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub thinking_delay: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            thinking_delay: THINKING_DELAY,
        }
    }
}

/// Text and attachments not yet sent
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Draft {
    pub input: String,
    pub attachments: Vec<Attachment>,
}

struct ActiveExchange {
    token: CancellationToken,
    placeholder: Option<MessageId>,
}

pub(crate) struct Inner {
    pub(crate) log: Mutex<ConversationLog>,
    draft: Mutex<Draft>,
    catalog: PersonaCatalog,
    pub(crate) persona: Mutex<Persona>,
    phase: watch::Sender<Phase>,
    active: Mutex<Option<ActiveExchange>>,
    pub(crate) client: Arc<dyn GenerationClient>,
    settings: watch::Receiver<Settings>,
    pub(crate) relay: NotificationRelay,
    speech: Mutex<Arc<dyn SpeechRecognizer>>,
    tasks: TaskTracker,
    events: broadcast::Sender<EngineEvent>,
    options: EngineOptions,
}

impl Inner {
    pub(crate) fn settings(&self) -> Settings {
        self.settings.borrow().clone()
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_phase(&self, phase: Phase) {
        if self.phase.send_replace(phase) != phase {
            self.emit(EngineEvent::PhaseChanged(phase));
        }
    }

    /// Atomic single-flight check: only an idle engine can start work
    fn claim(&self, phase: Phase) -> bool {
        let claimed = self.phase.send_if_modified(|current| {
            if *current == Phase::Idle {
                *current = phase;
                true
            } else {
                false
            }
        });
        if claimed {
            self.emit(EngineEvent::PhaseChanged(phase));
        }
        claimed
    }
}

/// Returns the engine to `Idle` however the owning future ends, including
/// being dropped mid-stream.
struct Flight<'a> {
    inner: &'a Inner,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if let Some(active) = self.inner.active.lock().take() {
            if let Some(id) = active.placeholder {
                self.inner.log.lock().stop_streaming(id);
            }
        }
        self.inner.set_phase(Phase::Idle);
    }
}

/// Owns the conversation log and runs exchanges against a [`GenerationClient`].
///
/// Cheap to clone; clones share the same state. At most one exchange (send
/// or step explanation) is in flight at a time.
#[derive(Clone)]
pub struct ConversationEngine {
    pub(crate) inner: Arc<Inner>,
}

impl ConversationEngine {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        settings: watch::Receiver<Settings>,
        catalog: PersonaCatalog,
    ) -> Self {
        Self::with_options(client, settings, catalog, EngineOptions::default())
    }

    pub fn with_options(
        client: Arc<dyn GenerationClient>,
        settings: watch::Receiver<Settings>,
        catalog: PersonaCatalog,
        options: EngineOptions,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let persona = catalog.default_persona().clone();

        Self {
            inner: Arc::new(Inner {
                log: Mutex::new(ConversationLog::new()),
                draft: Mutex::new(Draft::default()),
                catalog,
                persona: Mutex::new(persona),
                phase,
                active: Mutex::new(None),
                client,
                settings,
                relay: NotificationRelay::new(),
                speech: Mutex::new(Arc::new(UnavailableRecognizer)),
                tasks: TaskTracker::new(),
                events,
                options,
            }),
        }
    }

    pub fn set_speech_recognizer(&self, recognizer: Arc<dyn SpeechRecognizer>) {
        *self.inner.speech.lock() = recognizer;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn notifications(&self) -> &NotificationRelay {
        &self.inner.relay
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.inner.phase.subscribe()
    }

    /// Snapshot of the log
    pub fn messages(&self) -> Vec<Message> {
        self.inner.log.lock().messages().to_vec()
    }

    pub fn message(&self, index: usize) -> Option<Message> {
        self.inner.log.lock().get(index).cloned()
    }

    pub fn draft(&self) -> Draft {
        self.inner.draft.lock().clone()
    }

    pub fn persona(&self) -> Persona {
        self.inner.persona.lock().clone()
    }

    pub fn personas(&self) -> &PersonaCatalog {
        &self.inner.catalog
    }

    /// Wait until every spawned side effect (auto-image requests) has finished
    pub async fn settle(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.inner.draft.lock().input = text.into();
    }

    /// Encode files into the draft. Each failure is relayed and skipped.
    pub fn attach(&self, files: &[FileInput]) -> usize {
        let (encoded, errors) = attachment::encode_batch(files);
        for error in errors {
            self.inner.relay.error(error.to_string());
        }
        let added = encoded.len();
        self.inner.draft.lock().attachments.extend(encoded);
        added
    }

    pub async fn attach_paths(&self, paths: &[PathBuf]) -> usize {
        let mut added = 0;
        for path in paths {
            match attachment::encode_path(path).await {
                Ok(encoded) => {
                    self.inner.draft.lock().attachments.push(encoded);
                    added += 1;
                }
                Err(error) => {
                    self.inner.relay.error(error.to_string());
                }
            }
        }
        added
    }

    /// Drop a pending attachment; out-of-range indexes are ignored
    pub fn remove_attachment(&self, index: usize) -> Option<Attachment> {
        let mut draft = self.inner.draft.lock();
        if index < draft.attachments.len() {
            Some(draft.attachments.remove(index))
        } else {
            None
        }
    }

    /// Capture one utterance and append it to the draft input
    pub async fn dictate(&self) -> Result<String, SpeechError> {
        let recognizer = Arc::clone(&*self.inner.speech.lock());
        match recognizer.transcribe_once().await {
            Ok(transcript) => {
                let mut draft = self.inner.draft.lock();
                draft.input.push(' ');
                draft.input.push_str(&transcript);
                Ok(transcript)
            }
            Err(error) => {
                self.inner.relay.error(error.to_string());
                Err(error)
            }
        }
    }

    /// Send `text` with the draft's attachments
    pub async fn send(&self, text: &str) -> SendOutcome {
        self.run_exchange(text, None, false).await
    }

    /// Replace the last user/model pair with a new prompt
    pub async fn edit(&self, text: &str) -> SendOutcome {
        self.run_exchange(text, None, true).await
    }

    /// Send the draft input and attachments
    pub async fn submit_draft(&self) -> SendOutcome {
        let input = self.inner.draft.lock().input.clone();
        self.run_exchange(&input, None, false).await
    }

    /// Send with explicit attachments, leaving the draft alone
    pub async fn send_message(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
        is_edit: bool,
    ) -> SendOutcome {
        self.run_exchange(text, Some(attachments), is_edit).await
    }

    /// Ask for a line-by-line walkthrough of a code block
    pub async fn explain_code(&self, language: Option<&str>, code: &str) -> SendOutcome {
        self.send_message(&explain_code_prompt(language, code), Vec::new(), false)
            .await
    }

    #[instrument(skip(self, text, attachments))]
    async fn run_exchange(
        &self,
        text: &str,
        attachments: Option<Vec<Attachment>>,
        is_edit: bool,
    ) -> SendOutcome {
        let inner = &*self.inner;

        let has_attachments = match &attachments {
            Some(attachments) => !attachments.is_empty(),
            None => !inner.draft.lock().attachments.is_empty(),
        };
        if text.trim().is_empty() && !has_attachments {
            return SendOutcome::Rejected(RejectReason::Empty);
        }
        if !inner.claim(Phase::Drafting) {
            debug!("Send rejected: exchange in flight");
            return SendOutcome::Rejected(RejectReason::Busy);
        }
        let _flight = Flight { inner };

        let attachments = attachments.unwrap_or_else(|| {
            let mut draft = inner.draft.lock();
            draft.input.clear();
            std::mem::take(&mut draft.attachments)
        });
        let settings = inner.settings();
        let persona = inner.persona.lock().clone();
        let token = CancellationToken::new();

        let user = Message::user(text, attachments);
        {
            let mut active = inner.active.lock();
            *active = Some(ActiveExchange {
                token: token.clone(),
                placeholder: None,
            });
            let mut log = inner.log.lock();
            if is_edit {
                log.discard_last_exchange();
            }
            log.push(user.clone());
        }
        inner.emit(EngineEvent::UserMessageAdded(user));

        inner.set_phase(Phase::ThinkingDelay);
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Exchange cancelled during thinking delay");
                inner.emit(EngineEvent::Cancelled { id: None });
                return SendOutcome::Cancelled(None);
            }
            _ = tokio::time::sleep(inner.options.thinking_delay) => {}
        }

        let placeholder = Message::placeholder();
        let id = placeholder.id;
        let history = {
            let mut active = inner.active.lock();
            if token.is_cancelled() {
                drop(active);
                inner.emit(EngineEvent::Cancelled { id: None });
                return SendOutcome::Cancelled(None);
            }
            if let Some(active) = active.as_mut() {
                active.placeholder = Some(id);
            }
            let mut log = inner.log.lock();
            let history = log.history();
            log.push(placeholder.clone());
            history
        };
        inner.emit(EngineEvent::MessageAppended(placeholder));
        inner.set_phase(Phase::Streaming);

        info!(
            message_id = %id,
            model = %settings.model,
            persona = %persona.id,
            history_len = history.len(),
            "Exchange started"
        );

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            opened = inner.client.stream_completion(
                &settings.model,
                &history,
                &persona.system_prompt,
                &settings,
            ) => Some(opened),
        };
        let mut stream = match opened {
            None => return self.finish_cancelled(id),
            Some(Err(error)) => return self.finish_failed(id, error),
            Some(Ok(stream)) => stream,
        };

        loop {
            match stream.next_step(&token).await {
                StreamStep::Delta(delta) => {
                    let directive = {
                        let mut log = inner.log.lock();
                        match log.append_chunk(id, &delta) {
                            Some(message) if message.image_state() == &ImageState::None => {
                                detect_image_directive(&message.content)
                            }
                            Some(_) => None,
                            // Stopped by cancel; the stream reports it next
                            None => continue,
                        }
                    };
                    inner.emit(EngineEvent::Chunk { id, delta });
                    if let Some(prompt) = directive {
                        self.dispatch_auto_image(id, prompt, &settings);
                    }
                }
                StreamStep::Finished => break,
                StreamStep::Cancelled => return self.finish_cancelled(id),
                StreamStep::Failed(error) => return self.finish_failed(id, error),
            }
        }

        let completion = stream.into_completion();
        let directive = detect_image_directive(&completion.text);
        let source_count = completion.sources.len();
        if !inner
            .log
            .lock()
            .finalize(id, completion.text, completion.sources)
        {
            // cancel() won the race against the final chunk
            return self.finish_cancelled(id);
        }
        if let Some(prompt) = directive {
            self.dispatch_auto_image(id, prompt, &settings);
        }

        info!(message_id = %id, sources = source_count, "Exchange completed");
        inner.emit(EngineEvent::Completed { id });
        SendOutcome::Completed(id)
    }

    fn finish_cancelled(&self, id: MessageId) -> SendOutcome {
        self.inner.log.lock().stop_streaming(id);
        info!(message_id = %id, "Exchange cancelled");
        self.inner.emit(EngineEvent::Cancelled { id: Some(id) });
        SendOutcome::Cancelled(Some(id))
    }

    fn finish_failed(&self, id: MessageId, error: GenerationError) -> SendOutcome {
        let text = error.user_message();
        warn!(message_id = %id, error = %error, "Exchange failed");
        if self.inner.log.lock().mark_error(id, text.clone()) {
            self.inner.relay.error(text);
        }
        self.inner.emit(EngineEvent::Failed {
            id,
            error: error.clone(),
        });
        SendOutcome::Failed { id, error }
    }

    /// Start the one image request a message may ever get.
    ///
    /// Runs beside the text stream and merges into the message by id
    /// whenever it resolves.
    fn dispatch_auto_image(&self, id: MessageId, prompt: String, settings: &Settings) {
        if !self.inner.log.lock().claim_image(id) {
            return;
        }
        debug!(message_id = %id, prompt = %prompt, "Auto-image dispatched");

        let inner = Arc::clone(&self.inner);
        let settings = settings.clone();
        self.inner.tasks.spawn(async move {
            let prompt = format!("{}{}", prompt, AUTO_IMAGE_STYLE);
            match inner.client.generate_image(&prompt, &settings).await {
                Ok(image) => {
                    if inner.log.lock().merge_image(id, Some(image.uri.clone())) {
                        info!(message_id = %id, "Auto-image ready");
                        inner.emit(EngineEvent::ImageReady { id, uri: image.uri });
                    }
                }
                Err(error) => {
                    warn!(message_id = %id, error = %error, "Auto-image failed");
                    if inner.log.lock().merge_image(id, None) {
                        if !error.is_rate_limited() {
                            inner.relay.error(format!(
                                "Automatic image generation failed: {}",
                                error.user_message()
                            ));
                        }
                        inner.emit(EngineEvent::ImageFailed { id, error });
                    }
                }
            }
        });
    }

    /// Stop the active stream. Returns false when nothing was in flight.
    pub fn cancel(&self) -> bool {
        let active = self.inner.active.lock();
        let Some(active) = active.as_ref() else {
            return false;
        };
        active.token.cancel();
        if let Some(id) = active.placeholder {
            self.inner.log.lock().stop_streaming(id);
        }
        debug!(placeholder = ?active.placeholder, "Cancel requested");
        true
    }

    /// Append a step-by-step derivation of the model answer at `index`.
    ///
    /// No-op unless `index` is a model entry preceded by a user entry with
    /// content, and no other exchange is in flight. [`Self::cancel`] and a
    /// persona switch abandon it without appending anything.
    #[instrument(skip(self))]
    pub async fn regenerate_explanation(&self, index: usize) -> Option<MessageId> {
        let inner = &*self.inner;
        let (question, answer) = {
            let log = inner.log.lock();
            let answer = log.get(index).filter(|m| m.role == MessageRole::Model)?;
            let question = log
                .get(index.checked_sub(1)?)
                .filter(|m| m.role == MessageRole::User && !m.content.is_empty())?;
            (question.content.clone(), answer.content.clone())
        };

        if !inner.claim(Phase::Explaining) {
            return None;
        }
        let _flight = Flight { inner };
        let settings = inner.settings();
        let token = CancellationToken::new();
        *inner.active.lock() = Some(ActiveExchange {
            token: token.clone(),
            placeholder: None,
        });

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Step explanation cancelled");
                return None;
            }
            result = inner
                .client
                .explain_steps(&question, &answer, &settings.model, &settings) => result,
        };

        match result {
            Ok(text) => {
                let message = Message::model(format!("{}{}", STEPS_PREFIX, text));
                let id = {
                    let active = inner.active.lock();
                    // A persona switch may have cleared the log meanwhile
                    if token.is_cancelled() {
                        drop(active);
                        return None;
                    }
                    inner.log.lock().push(message.clone())
                };
                inner.emit(EngineEvent::MessageAppended(message));
                Some(id)
            }
            Err(error) => {
                warn!(error = %error, "Step explanation failed");
                inner.relay.error(error.user_message());
                None
            }
        }
    }

    /// Switch persona, cancelling any exchange and clearing log and draft
    pub fn select_persona(&self, id: &str) -> Option<Persona> {
        let persona = self.inner.catalog.get(id)?.clone();
        self.cancel();
        self.inner.log.lock().clear();
        *self.inner.draft.lock() = Draft::default();
        *self.inner.persona.lock() = persona.clone();
        info!(persona = %persona.id, "Persona selected");
        self.inner.emit(EngineEvent::LogReset);
        Some(persona)
    }

    pub fn export_message(&self, index: usize, format: ExportFormat) -> Option<ExportArtifact> {
        let log = self.inner.log.lock();
        export::export_message(log.get(index)?, format)
    }
}
