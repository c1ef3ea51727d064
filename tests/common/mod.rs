//! Shared test utilities
//!
//! Fake engines record every call; the scripted dispatcher answers from a
//! queue. Signals are injected through the builder's sinks, the same way the
//! native engines report.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jarvis_voice::config::TimingConfig;
use jarvis_voice::dispatch::{TaskDraft, TaskPatch};
use jarvis_voice::voice::{
    RecognitionEngine, RecognitionEvent, RecognitionSignal, SynthesisEngine, SynthesisEvent,
    SynthesisSignal, Utterance,
};
use jarvis_voice::{
    CommandDispatcher, CommandReply, ControllerBuilder, ControllerHandle, CredentialStore, Error,
    Result, SettingsBus, Snapshot, Task, TaskId, TranscriptEvent, VoiceSettings,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Delay before an automatic re-listen in tests
pub const RELISTEN_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
pub struct RecognizerLog {
    /// Capture session numbers passed to `start`
    pub starts: Vec<u64>,
    pub stops: usize,
    /// Error returned by the next `start`
    pub refuse: Option<Error>,
}

/// Recognition engine that only records calls
#[derive(Clone, Default)]
pub struct FakeRecognizer {
    pub log: Arc<Mutex<RecognizerLog>>,
}

impl FakeRecognizer {
    pub fn starts(&self) -> Vec<u64> {
        self.log.lock().unwrap().starts.clone()
    }

    pub fn stops(&self) -> usize {
        self.log.lock().unwrap().stops
    }

    /// Session number of the most recent start
    pub fn current(&self) -> u64 {
        self.starts().last().copied().expect("capture never started")
    }

    pub fn refuse_next(&self, error: Error) {
        self.log.lock().unwrap().refuse = Some(error);
    }
}

impl RecognitionEngine for FakeRecognizer {
    fn start(&mut self, session: u64) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if let Some(error) = log.refuse.take() {
            return Err(error);
        }
        log.starts.push(session);
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().stops += 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthCall {
    Speak(Utterance),
    Cancel,
}

/// Synthesis engine that only records calls
#[derive(Clone)]
pub struct FakeSynthesizer {
    pub calls: Arc<Mutex<Vec<SynthCall>>>,
    pub voices: Vec<String>,
}

impl Default for FakeSynthesizer {
    fn default() -> Self {
        Self {
            calls: Arc::default(),
            voices: vec![
                "Microsoft Zira".to_string(),
                "Google UK English Male".to_string(),
            ],
        }
    }
}

impl FakeSynthesizer {
    pub fn calls(&self) -> Vec<SynthCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SynthCall::Speak(utterance) => Some(utterance),
                SynthCall::Cancel => None,
            })
            .collect()
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken().into_iter().map(|u| u.text).collect()
    }

    pub fn cancels(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SynthCall::Cancel))
            .count()
    }

    pub fn last_generation(&self) -> u64 {
        self.spoken().last().expect("nothing spoken").generation
    }
}

impl SynthesisEngine for FakeSynthesizer {
    fn voices(&self) -> Vec<String> {
        self.voices.clone()
    }

    fn speak(&mut self, utterance: Utterance) -> Result<()> {
        self.calls.lock().unwrap().push(SynthCall::Speak(utterance));
        Ok(())
    }

    fn cancel(&mut self) {
        self.calls.lock().unwrap().push(SynthCall::Cancel);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub text: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub chat: bool,
}

/// Scripted reply with an optional latency
pub struct Scripted {
    pub delay: Duration,
    pub outcome: Result<CommandReply>,
}

/// Dispatcher answering from a queue and keeping an in-memory task list
#[derive(Default)]
pub struct ScriptedDispatcher {
    replies: Mutex<VecDeque<Scripted>>,
    fetch_script: Mutex<VecDeque<(Duration, Vec<Task>)>>,
    pub sent: Mutex<Vec<SentCommand>>,
    pub tasks: Mutex<Vec<Task>>,
    pub fetches: AtomicUsize,
    pub task_writes: Mutex<Vec<String>>,
    pub fail_task_writes: AtomicBool,
    next_id: AtomicUsize,
}

impl ScriptedDispatcher {
    pub fn reply(&self, reply: CommandReply) {
        self.reply_after(Duration::ZERO, reply);
    }

    pub fn reply_after(&self, delay: Duration, reply: CommandReply) {
        self.replies.lock().unwrap().push_back(Scripted {
            delay,
            outcome: Ok(reply),
        });
    }

    pub fn fail(&self, reason: &str) {
        self.replies.lock().unwrap().push_back(Scripted {
            delay: Duration::ZERO,
            outcome: Err(Error::DispatchFailed(reason.to_string())),
        });
    }

    /// Answer the next unscripted fetch with `tasks` after `delay`
    ///
    /// Without a script, fetches return the live task list at once.
    pub fn fetch_after(&self, delay: Duration, tasks: Vec<Task>) {
        self.fetch_script.lock().unwrap().push_back((delay, tasks));
    }

    pub fn set_tasks(&self, tasks: Vec<Task>) {
        *self.tasks.lock().unwrap() = tasks;
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn task_writes(&self) -> Vec<String> {
        self.task_writes.lock().unwrap().clone()
    }

    async fn answer(&self, sent: SentCommand) -> Result<CommandReply> {
        self.sent.lock().unwrap().push(sent);
        let scripted = self.replies.lock().unwrap().pop_front();
        match scripted {
            Some(Scripted { delay, outcome }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                outcome
            }
            None => Ok(CommandReply::text("Very good, sir.")),
        }
    }

    fn write(&self, what: String) -> Result<()> {
        self.task_writes.lock().unwrap().push(what);
        if self.fail_task_writes.load(Ordering::SeqCst) {
            return Err(Error::DispatchFailed("tasks: 500 - boom".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CommandDispatcher for ScriptedDispatcher {
    async fn send_command(
        &self,
        command: &str,
        session_id: &str,
        token: Option<&str>,
    ) -> Result<CommandReply> {
        self.answer(SentCommand {
            text: command.to_string(),
            session_id: session_id.to_string(),
            user_id: None,
            token: token.map(ToString::to_string),
            chat: false,
        })
        .await
    }

    async fn send_chat(
        &self,
        message: &str,
        user_id: Option<&str>,
        session_id: &str,
        token: Option<&str>,
    ) -> Result<CommandReply> {
        self.answer(SentCommand {
            text: message.to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.map(ToString::to_string),
            token: token.map(ToString::to_string),
            chat: true,
        })
        .await
    }

    async fn fetch_tasks(&self, _token: Option<&str>) -> Result<Vec<Task>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let scripted = self.fetch_script.lock().unwrap().pop_front();
        match scripted {
            Some((delay, tasks)) => {
                tokio::time::sleep(delay).await;
                Ok(tasks)
            }
            None => Ok(self.tasks.lock().unwrap().clone()),
        }
    }

    async fn create_task(&self, draft: &TaskDraft, _token: Option<&str>) -> Result<Task> {
        self.write(format!("create {}", draft.text))?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut task = Task::new(format!("n{id}"), draft.text.clone());
        task.scheduled_for = draft.scheduled_for;
        self.tasks.lock().unwrap().push(task.clone());
        Ok(task)
    }

    async fn update_task(
        &self,
        id: &TaskId,
        patch: &TaskPatch,
        _token: Option<&str>,
    ) -> Result<Option<Task>> {
        self.write(format!("update {id}"))?;
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.iter_mut().find(|t| &t.id == id).map(|task| {
            if let Some(completed) = patch.completed {
                task.completed = completed;
            }
            if let Some(text) = &patch.text {
                task.text.clone_from(text);
            }
            task.clone()
        });
        Ok(task)
    }

    async fn delete_task(&self, id: &TaskId, _token: Option<&str>) -> Result<()> {
        self.write(format!("delete {id}"))?;
        self.tasks.lock().unwrap().retain(|t| &t.id != id);
        Ok(())
    }
}

/// A running controller wired to fakes
pub struct Harness {
    pub handle: ControllerHandle,
    pub recognizer: FakeRecognizer,
    pub synthesizer: FakeSynthesizer,
    pub dispatcher: Arc<ScriptedDispatcher>,
    pub settings: SettingsBus,
    pub credentials: CredentialStore,
    recognition: mpsc::UnboundedSender<RecognitionSignal>,
    synthesis: mpsc::UnboundedSender<SynthesisSignal>,
    task: JoinHandle<()>,
    _dir: TempDir,
}

impl Harness {
    /// Controller with both fake engines and voice output enabled
    pub fn start() -> Self {
        Self::build(true, true)
    }

    /// Controller with no recognition or synthesis engine
    pub fn without_engines() -> Self {
        Self::build(false, false)
    }

    fn build(recognition: bool, synthesis: bool) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let credentials = CredentialStore::in_dir(dir.path());
        let settings = SettingsBus::new(VoiceSettings::default());
        let dispatcher = Arc::new(ScriptedDispatcher::default());

        let builder = ControllerBuilder::new(
            Arc::clone(&dispatcher) as Arc<dyn CommandDispatcher>,
            credentials.clone(),
            settings.subscribe(),
        )
        .timing(TimingConfig {
            playback_delay: Duration::ZERO,
            relisten_delay: RELISTEN_DELAY,
        })
        .assistant_voices(vec!["uk english male".to_string()]);

        let recognition_tx = builder.recognition_sink();
        let synthesis_tx = builder.synthesis_sink();

        let recognizer = FakeRecognizer::default();
        let synthesizer = FakeSynthesizer::default();

        let (controller, handle) = builder.build(
            recognition.then(|| Box::new(recognizer.clone()) as Box<dyn RecognitionEngine>),
            synthesis.then(|| Box::new(synthesizer.clone()) as Box<dyn SynthesisEngine>),
        );
        let task = tokio::spawn(controller.run());

        Self {
            handle,
            recognizer,
            synthesizer,
            dispatcher,
            settings,
            credentials,
            recognition: recognition_tx,
            synthesis: synthesis_tx,
            task,
            _dir: dir,
        }
    }

    /// Sign in as a guest and let the greeting and first fetch settle
    pub async fn signed_in(self) -> Self {
        self.handle.sign_in(None);
        self.wait_for(|s| s.session_id.is_some()).await;
        settle().await;
        self
    }

    pub fn snapshot(&self) -> Snapshot {
        self.handle.snapshot()
    }

    /// Wait until a published snapshot satisfies `predicate`
    pub async fn wait_for(&self, predicate: impl Fn(&Snapshot) -> bool) -> Snapshot {
        let mut snapshots = self.handle.subscribe();
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                {
                    let snapshot = snapshots.borrow_and_update();
                    if predicate(&snapshot) {
                        return snapshot.clone();
                    }
                }
                snapshots.changed().await.expect("controller stopped");
            }
        })
        .await
        .expect("condition never reached")
    }

    /// Deliver a recognition event for the current capture session
    pub fn recognize(&self, event: RecognitionEvent) {
        self.recognize_in(self.recognizer.current(), event);
    }

    pub fn recognize_in(&self, session: u64, event: RecognitionEvent) {
        self.recognition
            .send(RecognitionSignal::new(session, event))
            .expect("controller stopped");
    }

    pub fn interim(&self, text: &str) {
        self.recognize(RecognitionEvent::Transcript(TranscriptEvent::interim(text)));
    }

    pub fn say_final(&self, text: &str) {
        self.recognize(RecognitionEvent::Transcript(TranscriptEvent::final_text(
            text,
        )));
    }

    /// Deliver a synthesis event for `generation`
    pub fn synthesis(&self, generation: u64, event: SynthesisEvent) {
        self.synthesis
            .send(SynthesisSignal::new(generation, event))
            .expect("controller stopped");
    }

    pub async fn shutdown(self) {
        self.handle.shutdown();
        self.task.await.expect("controller panicked");
    }
}

/// Let spawned work and the controller loop run without advancing timers much
pub async fn settle() {
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
