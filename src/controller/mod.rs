//! Voice interaction controller
//!
//! One task owns all controller state and reacts to four event sources:
//! presentation commands, recognition signals, synthesis signals and
//! completions of work it spawned (dispatches, task syncs, re-listen timers).
//! Voice settings are read from their watch channel whenever a reply is
//! spoken. Adapters never touch the store; presentation reads [`Snapshot`]s.
//!
//! ```text
//!  ControllerHandle ──commands──┐
//!  recognizer ──RecognitionSignal┤                 ┌── watch<Snapshot>
//!  synthesizer ─SynthesisSignal─┼──► VoiceController ┤
//!  spawned work ─────Internal───┘                 └── broadcast<Notice>
//! ```

mod events;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};

pub use events::Notice;
use events::{Command, Internal, Origin, Ticket};

use crate::Error;
use crate::config::TimingConfig;
use crate::credentials::CredentialStore;
use crate::dispatch::{CommandDispatcher, CommandReply, TaskDirective, TaskDraft, TaskPatch};
use crate::model::{Role, Task, TaskId, TranscriptEvent, UserProfile, VoiceSettings};
use crate::session::{ControllerState, Session, Snapshot, greeting};
use crate::voice::{
    CaptureAdapter, CaptureUpdate, PlaybackAdapter, PlaybackUpdate, RecognitionEngine,
    RecognitionSignal, SynthesisEngine, SynthesisSignal,
};

/// Assistant message used when the backend reply carries no text
pub const FALLBACK_REPLY: &str = "Command processed, sir.";

/// Assistant message used when the backend cannot be reached
pub const APOLOGY: &str = "Apologies, sir. I seem to be experiencing technical difficulties.";

/// Capacity of the notice broadcast
const NOTICE_CAPACITY: usize = 16;

/// Assembles a controller and the channels its engines report into
pub struct ControllerBuilder {
    dispatcher: Arc<dyn CommandDispatcher>,
    credentials: CredentialStore,
    settings: watch::Receiver<VoiceSettings>,
    timing: TimingConfig,
    assistant_voices: Vec<String>,
    recognition: (
        mpsc::UnboundedSender<RecognitionSignal>,
        mpsc::UnboundedReceiver<RecognitionSignal>,
    ),
    synthesis: (
        mpsc::UnboundedSender<SynthesisSignal>,
        mpsc::UnboundedReceiver<SynthesisSignal>,
    ),
}

impl ControllerBuilder {
    #[must_use]
    pub fn new(
        dispatcher: Arc<dyn CommandDispatcher>,
        credentials: CredentialStore,
        settings: watch::Receiver<VoiceSettings>,
    ) -> Self {
        Self {
            dispatcher,
            credentials,
            settings,
            timing: TimingConfig::default(),
            assistant_voices: Vec::new(),
            recognition: mpsc::unbounded_channel(),
            synthesis: mpsc::unbounded_channel(),
        }
    }

    #[must_use]
    pub const fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Preferred synthesis voices, best first
    #[must_use]
    pub fn assistant_voices(mut self, voices: Vec<String>) -> Self {
        self.assistant_voices = voices;
        self
    }

    /// Channel a recognition engine reports into
    #[must_use]
    pub fn recognition_sink(&self) -> mpsc::UnboundedSender<RecognitionSignal> {
        self.recognition.0.clone()
    }

    /// Channel a synthesis engine reports into
    #[must_use]
    pub fn synthesis_sink(&self) -> mpsc::UnboundedSender<SynthesisSignal> {
        self.synthesis.0.clone()
    }

    /// Build the controller; `None` engines disable that modality
    #[must_use]
    pub fn build(
        self,
        recognizer: Option<Box<dyn RecognitionEngine>>,
        synthesizer: Option<Box<dyn SynthesisEngine>>,
    ) -> (VoiceController, ControllerHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (notices_tx, _) = broadcast::channel(NOTICE_CAPACITY);

        let capture = CaptureAdapter::new(recognizer);
        let playback = PlaybackAdapter::new(synthesizer, self.assistant_voices);

        let initial = Snapshot {
            voice_input: capture.availability(),
            ..Snapshot::default()
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let (recognition_tx, recognition_rx) = self.recognition;
        let (synthesis_tx, synthesis_rx) = self.synthesis;

        let controller = VoiceController {
            dispatcher: self.dispatcher,
            credentials: self.credentials,
            settings: self.settings,
            timing: self.timing,
            capture,
            playback,
            session: None,
            session_epoch: 0,
            interim: String::new(),
            outstanding: 0,
            toggles: 0,
            pending_relisten: HashMap::new(),
            next_relisten: 0,
            fetches_issued: 0,
            fetch_applied: 0,
            voice_notice_sent: false,
            last_state: ControllerState::Idle,
            commands_rx,
            recognition_rx,
            synthesis_rx,
            internal_tx,
            internal_rx,
            _sinks: (recognition_tx, synthesis_tx),
            snapshot_tx,
            notices_tx: notices_tx.clone(),
        };

        let handle = ControllerHandle {
            commands: commands_tx,
            snapshots: snapshot_rx,
            notices: notices_tx,
        };

        (controller, handle)
    }
}

/// Cloneable front door to a running [`VoiceController`]
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Snapshot>,
    notices: broadcast::Sender<Notice>,
}

impl ControllerHandle {
    /// Start capture when idle, stop it when listening
    pub fn toggle_listening(&self) {
        self.send(Command::ToggleListening);
    }

    /// Send a typed chat message
    pub fn send_chat(&self, message: impl Into<String>) {
        self.send(Command::SendChat(message.into()));
    }

    /// Start a fresh session, ending any current one
    pub fn sign_in(&self, user: Option<UserProfile>) {
        self.send(Command::SignIn(user));
    }

    pub fn sign_out(&self) {
        self.send(Command::SignOut);
    }

    pub fn create_task(&self, text: impl Into<String>, scheduled_for: Option<DateTime<Utc>>) {
        self.send(Command::CreateTask(TaskDraft {
            text: text.into(),
            scheduled_for,
        }));
    }

    pub fn set_task_completed(&self, id: TaskId, completed: bool) {
        self.send(Command::SetTaskCompleted(id, completed));
    }

    pub fn rename_task(&self, id: TaskId, text: impl Into<String>) {
        self.send(Command::RenameTask(id, text.into()));
    }

    pub fn delete_task(&self, id: TaskId) {
        self.send(Command::DeleteTask(id));
    }

    /// Re-fetch the authoritative task list
    pub fn refresh_tasks(&self) {
        self.send(Command::RefreshTasks);
    }

    /// Stop capture and playback and end the controller loop
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    /// Latest published state
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Receive notices published from now on
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("controller stopped, command dropped");
        }
    }
}

/// Coordinates capture, playback, dispatch and the session store
pub struct VoiceController {
    dispatcher: Arc<dyn CommandDispatcher>,
    credentials: CredentialStore,
    settings: watch::Receiver<VoiceSettings>,
    timing: TimingConfig,

    capture: CaptureAdapter,
    playback: PlaybackAdapter,

    session: Option<Session>,
    /// Bumped whenever a session ends; results tagged with an older value are dropped
    session_epoch: u64,
    interim: String,
    /// Dispatches awaiting a reply
    outstanding: usize,
    /// Count of user listening toggles
    toggles: u64,
    /// Re-listen token -> toggle count when its dispatch was issued
    pending_relisten: HashMap<u64, u64>,
    next_relisten: u64,
    fetches_issued: u64,
    fetch_applied: u64,
    voice_notice_sent: bool,
    last_state: ControllerState,

    commands_rx: mpsc::UnboundedReceiver<Command>,
    recognition_rx: mpsc::UnboundedReceiver<RecognitionSignal>,
    synthesis_rx: mpsc::UnboundedReceiver<SynthesisSignal>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    /// Keeps the engine channels open when no engine holds a sender
    _sinks: (
        mpsc::UnboundedSender<RecognitionSignal>,
        mpsc::UnboundedSender<SynthesisSignal>,
    ),

    snapshot_tx: watch::Sender<Snapshot>,
    notices_tx: broadcast::Sender<Notice>,
}

impl VoiceController {
    /// Process events until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        tracing::info!("voice controller started");

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(signal) = self.recognition_rx.recv() => self.on_recognition(signal),
                Some(signal) = self.synthesis_rx.recv() => self.on_synthesis(&signal),
                Some(event) = self.internal_rx.recv() => self.on_internal(event),
            }
            self.publish();
        }

        self.capture.stop();
        self.playback.cancel();
        self.publish();
        tracing::info!("voice controller stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::ToggleListening => self.toggle_listening(),
            Command::SendChat(message) => self.send_chat(&message),
            Command::SignIn(user) => self.sign_in(user),
            Command::SignOut => self.sign_out(),
            Command::CreateTask(draft) => self.create_task(&draft),
            Command::SetTaskCompleted(id, completed) => self.set_task_completed(id, completed),
            Command::RenameTask(id, text) => self.rename_task(id, &text),
            Command::DeleteTask(id) => self.delete_task(id),
            Command::RefreshTasks => self.refresh_tasks(),
            Command::Shutdown => {}
        }
    }

    fn toggle_listening(&mut self) {
        if self.session.is_none() {
            tracing::debug!("toggle ignored, no session");
            return;
        }

        self.toggles += 1;

        if self.capture.should_listen() {
            self.capture.stop();
            self.interim.clear();
            tracing::info!("listening stopped");
            return;
        }

        self.playback.cancel();
        match self.capture.start() {
            Ok(()) => tracing::info!("listening"),
            Err(e) => self.capture_failed(e),
        }
    }

    fn on_recognition(&mut self, signal: RecognitionSignal) {
        match self.capture.handle(signal) {
            CaptureUpdate::Ignored | CaptureUpdate::Restarted => {}
            CaptureUpdate::Transcript(event) => self.on_transcript(&event),
            CaptureUpdate::Stopped => self.interim.clear(),
            CaptureUpdate::Failed(e) => self.capture_failed(e),
        }
    }

    fn on_transcript(&mut self, event: &TranscriptEvent) {
        // Barge-in comes before anything else
        if event.has_speech() && self.playback.is_active() {
            tracing::debug!("user speech over playback, cancelling");
            self.playback.cancel();
        }

        match event.finalized() {
            Some(text) => {
                self.interim.clear();
                self.dispatch(text.to_string(), Origin::Voice);
            }
            None => event.interim.trim().clone_into(&mut self.interim),
        }
    }

    fn capture_failed(&mut self, error: Error) {
        self.interim.clear();

        if !error.disables_voice() {
            tracing::warn!(error = %error, "capture failed");
            self.notify(Notice::CaptureError(error.to_string()));
            return;
        }

        // Shown once; the modality stays disabled afterwards
        if !self.voice_notice_sent {
            let notice = match error {
                Error::PermissionDenied => Notice::PermissionDenied,
                _ => Notice::VoiceUnsupported,
            };
            tracing::warn!(?notice, "voice input unavailable");
            self.voice_notice_sent = true;
            self.notify(notice);
        }
    }

    fn send_chat(&mut self, message: &str) {
        let message = message.trim();
        if message.is_empty() {
            return;
        }
        self.dispatch(message.to_string(), Origin::Chat);
    }

    fn dispatch(&mut self, text: String, origin: Origin) {
        let Some(session) = self.session.as_mut() else {
            tracing::warn!(?origin, "no session, dropping utterance");
            return;
        };

        session.push_message(Role::User, text.clone());
        let session_id = match origin {
            Origin::Voice => session.id().to_string(),
            Origin::Chat => session.chat_id(),
        };
        let user_id = session.user().and_then(|u| u.id.clone());

        let ticket = Ticket {
            epoch: self.session_epoch,
            origin,
            toggles: self.toggles,
        };
        self.outstanding += 1;

        // Read at dispatch time, never cached
        let token = self.credentials.token();
        let dispatcher = Arc::clone(&self.dispatcher);
        let internal = self.internal_tx.clone();

        tracing::debug!(?origin, session_id = %session_id, "dispatching");
        tokio::spawn(async move {
            let outcome = match origin {
                Origin::Voice => {
                    dispatcher
                        .send_command(&text, &session_id, token.as_deref())
                        .await
                }
                Origin::Chat => {
                    dispatcher
                        .send_chat(&text, user_id.as_deref(), &session_id, token.as_deref())
                        .await
                }
            };
            let _ = internal.send(Internal::Dispatched {
                ticket,
                outcome: outcome.map_err(Error::into_dispatch),
            });
        });
    }

    fn on_dispatched(&mut self, ticket: Ticket, outcome: crate::Result<CommandReply>) {
        self.outstanding = self.outstanding.saturating_sub(1);

        if ticket.epoch != self.session_epoch || self.session.is_none() {
            tracing::debug!("reply for an ended session, discarding");
            return;
        }

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "dispatch failed");
                self.append(Role::Assistant, APOLOGY);
                self.say(APOLOGY);
                self.notify(Notice::DispatchFailed(e.to_string()));
                return;
            }
        };

        match reply.spoken_text() {
            Some(text) => {
                self.append(Role::Assistant, text);
                self.say(text);
            }
            None => self.append(Role::Assistant, FALLBACK_REPLY),
        }

        if !reply.directives.is_empty() {
            self.apply_directives(reply.directives);
            self.refresh_tasks();
        }

        if reply.awaiting_input && ticket.origin == Origin::Voice && !self.capture.is_running() {
            self.schedule_relisten(ticket.toggles);
        }
    }

    fn apply_directives(&mut self, directives: Vec<TaskDirective>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        for directive in directives {
            let notice = directive.notice();
            match directive {
                TaskDirective::Created(task) => session.upsert_task(task),
                TaskDirective::Deleted(id) => {
                    session.remove_task(&id);
                }
                TaskDirective::Completed(id) => {
                    session.set_task_completed(&id, true);
                }
                TaskDirective::Updated { task, .. } => {
                    if let Some(task) = task {
                        session.upsert_task(task);
                    }
                }
            }
            session.push_message(Role::System, notice);
        }
    }

    fn schedule_relisten(&mut self, toggles: u64) {
        self.next_relisten += 1;
        let token = self.next_relisten;
        self.pending_relisten.insert(token, toggles);

        let delay = self.timing.relisten_delay;
        let internal = self.internal_tx.clone();
        tracing::debug!(token, ?delay, "re-listen scheduled");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::RelistenDue { token });
        });
    }

    fn relisten(&mut self, token: u64) {
        // A token fires at most once
        let Some(toggles) = self.pending_relisten.remove(&token) else {
            return;
        };

        if self.session.is_none() || self.capture.is_running() {
            return;
        }
        if toggles != self.toggles {
            tracing::debug!(token, "listening changed by user, skipping re-listen");
            return;
        }

        tracing::debug!(token, "re-listening for follow-up");
        if let Err(e) = self.capture.start() {
            self.capture_failed(e);
        }
    }

    fn say(&mut self, text: &str) {
        let settings = *self.settings.borrow();
        if !settings.enabled {
            return;
        }

        match self.playback.speak(text, settings) {
            Ok(_) => {}
            Err(Error::Unsupported) => tracing::debug!("no synthesis engine, not speaking"),
            Err(e) => {
                tracing::warn!(error = %e, "failed to speak");
                self.notify(Notice::SpeechFailed(e.to_string()));
            }
        }
    }

    fn on_synthesis(&mut self, signal: &SynthesisSignal) {
        match self.playback.handle(signal) {
            PlaybackUpdate::Ignored | PlaybackUpdate::Started | PlaybackUpdate::Finished => {}
            PlaybackUpdate::Failed(reason) => self.notify(Notice::SpeechFailed(reason)),
        }
    }

    fn sign_in(&mut self, user: Option<UserProfile>) {
        if self.session.is_some() {
            self.end_session();
        }

        if let Some(user) = &user {
            if let Err(e) = self.credentials.set_user(user) {
                tracing::warn!(error = %e, "failed to store user profile");
            }
        }

        let session = Session::new(user);
        tracing::info!(
            session_id = session.id(),
            user = session.user().map_or("GUEST", UserProfile::label),
            "signed in"
        );
        self.session = Some(session);

        let greeting = greeting();
        self.append(Role::Assistant, &greeting);
        self.say(&greeting);
        self.refresh_tasks();
    }

    fn sign_out(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.end_session();
        if let Err(e) = self.credentials.clear_user() {
            tracing::warn!(error = %e, "failed to clear user profile");
        }
        tracing::info!("signed out");
    }

    fn end_session(&mut self) {
        self.capture.stop();
        self.playback.cancel();
        self.session = None;
        self.session_epoch += 1;
        self.pending_relisten.clear();
        self.interim.clear();
    }

    fn refresh_tasks(&mut self) {
        if self.session.is_none() {
            return;
        }

        self.fetches_issued += 1;
        let fetch = self.fetches_issued;
        let epoch = self.session_epoch;
        let token = self.credentials.token();
        let dispatcher = Arc::clone(&self.dispatcher);
        let internal = self.internal_tx.clone();

        tokio::spawn(async move {
            let outcome = dispatcher.fetch_tasks(token.as_deref()).await;
            let _ = internal.send(Internal::TasksFetched {
                fetch,
                epoch,
                outcome,
            });
        });
    }

    fn on_tasks_fetched(&mut self, fetch: u64, epoch: u64, outcome: crate::Result<Vec<Task>>) {
        if epoch != self.session_epoch {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match outcome {
            Ok(tasks) if fetch > self.fetch_applied => {
                tracing::debug!(fetch, count = tasks.len(), "task list reconciled");
                self.fetch_applied = fetch;
                session.replace_tasks(tasks);
            }
            Ok(_) => {
                tracing::debug!(fetch, applied = self.fetch_applied, "stale task list dropped");
            }
            Err(e) => tracing::warn!(error = %e, "failed to load tasks"),
        }
    }

    fn create_task(&self, draft: &TaskDraft) {
        let text = draft.text.trim();
        if text.is_empty() || self.session.is_none() {
            return;
        }
        let draft = TaskDraft {
            text: text.to_string(),
            scheduled_for: draft.scheduled_for,
        };

        let epoch = self.session_epoch;
        let token = self.credentials.token();
        let dispatcher = Arc::clone(&self.dispatcher);
        let internal = self.internal_tx.clone();

        tokio::spawn(async move {
            let outcome = dispatcher.create_task(&draft, token.as_deref()).await;
            let _ = internal.send(Internal::TaskCreated { epoch, outcome });
        });
    }

    fn set_task_completed(&mut self, id: TaskId, completed: bool) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.set_task_completed(&id, completed) {
            tracing::debug!(task_id = %id, "unknown task");
        }
        let patch = TaskPatch {
            completed: Some(completed),
            text: None,
        };
        self.sync_update(id, patch);
    }

    fn rename_task(&mut self, id: TaskId, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.rename_task(&id, text) {
            tracing::debug!(task_id = %id, "unknown task");
        }
        let patch = TaskPatch {
            completed: None,
            text: Some(text.to_string()),
        };
        self.sync_update(id, patch);
    }

    fn delete_task(&mut self, id: TaskId) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.remove_task(&id);

        let epoch = self.session_epoch;
        let token = self.credentials.token();
        let dispatcher = Arc::clone(&self.dispatcher);
        let internal = self.internal_tx.clone();

        tokio::spawn(async move {
            let outcome = dispatcher.delete_task(&id, token.as_deref()).await;
            let _ = internal.send(Internal::TaskSynced {
                epoch,
                action: "delete",
                outcome,
            });
        });
    }

    fn sync_update(&self, id: TaskId, patch: TaskPatch) {
        let epoch = self.session_epoch;
        let token = self.credentials.token();
        let dispatcher = Arc::clone(&self.dispatcher);
        let internal = self.internal_tx.clone();

        tokio::spawn(async move {
            let outcome = dispatcher
                .update_task(&id, &patch, token.as_deref())
                .await
                .map(|_| ());
            let _ = internal.send(Internal::TaskSynced {
                epoch,
                action: "update",
                outcome,
            });
        });
    }

    fn on_internal(&mut self, event: Internal) {
        match event {
            Internal::Dispatched { ticket, outcome } => self.on_dispatched(ticket, outcome),
            Internal::TasksFetched {
                fetch,
                epoch,
                outcome,
            } => self.on_tasks_fetched(fetch, epoch, outcome),
            Internal::TaskCreated { epoch, outcome } => {
                if epoch != self.session_epoch {
                    return;
                }
                match outcome {
                    Ok(task) => {
                        tracing::info!(task_id = %task.id, "task created");
                        if let Some(session) = self.session.as_mut() {
                            session.upsert_task(task);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to create task");
                        self.notify(Notice::TaskSyncFailed(e.to_string()));
                    }
                }
                self.refresh_tasks();
            }
            Internal::TaskSynced {
                epoch,
                action,
                outcome,
            } => {
                if epoch != self.session_epoch {
                    return;
                }
                if let Err(e) = outcome {
                    tracing::warn!(action, error = %e, "task sync failed");
                    self.notify(Notice::TaskSyncFailed(e.to_string()));
                }
                self.refresh_tasks();
            }
            Internal::RelistenDue { token } => self.relisten(token),
        }
    }

    fn append(&mut self, role: Role, text: &str) {
        if let Some(session) = self.session.as_mut() {
            session.push_message(role, text);
        }
    }

    fn notify(&self, notice: Notice) {
        // No receivers is fine
        let _ = self.notices_tx.send(notice);
    }

    fn state(&self) -> ControllerState {
        if self.playback.is_speaking() {
            ControllerState::Speaking
        } else if self.outstanding > 0 {
            ControllerState::Dispatching
        } else if self.capture.should_listen() {
            ControllerState::Listening
        } else {
            ControllerState::Idle
        }
    }

    fn publish(&mut self) {
        let state = self.state();
        if state != self.last_state {
            tracing::debug!(from = ?self.last_state, to = ?state, "state changed");
            self.last_state = state;
        }

        let session = self.session.as_ref();
        let snapshot = Snapshot {
            state,
            listening: self.capture.should_listen(),
            speaking: self.playback.is_speaking(),
            interim: self.interim.clone(),
            messages: session.map(Session::shared_messages).unwrap_or_default(),
            tasks: session.map(Session::shared_tasks).unwrap_or_default(),
            session_id: session.map(|s| s.id().to_string()),
            user: session.and_then(|s| s.user().cloned()),
            voice_input: self.capture.availability(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}
