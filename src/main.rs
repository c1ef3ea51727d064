use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jarvis_voice::voice::{
    CloudSynthesizer, Microphone, MicrophoneRecognizer, RecognitionEngine, Speaker,
    SpeechToText, SynthesisEngine, TextToSpeech, decode_mp3, tone,
};
use jarvis_voice::{
    Config, ControllerBuilder, ControllerHandle, CredentialStore, HttpDispatcher, Role,
    SettingsBus, SettingsChange, Snapshot, TaskId, UserProfile, VoiceSettings,
};

/// JARVIS - voice front-end for the JARVIS assistant backend
#[derive(Parser)]
#[command(name = "jarvis", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable microphone and speaker (typed chat only)
    #[arg(long, env = "JARVIS_DISABLE_VOICE")]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the interactive console (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Speak text with the configured voice settings
    Say {
        /// Text to speak
        #[arg(default_value = "Good evening, sir. All systems operational.")]
        text: String,
    },
    /// Store a bearer token for the command backend
    Login {
        #[arg(short, long)]
        token: String,
        /// Email shown as the signed-in user
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Forget the stored token and user
    Logout,
    /// Show or change voice output settings
    Settings {
        /// Speak replies aloud
        #[arg(long)]
        enabled: Option<bool>,
        /// Speaking rate multiplier
        #[arg(long)]
        speed: Option<f32>,
        /// Output volume (0.0 - 1.0)
        #[arg(long)]
        volume: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,jarvis_voice=info",
        1 => "info,jarvis_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_with_options(cli.disable_voice)?;
    tracing::debug!(data_dir = %config.data_dir.display(), "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => console(config).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::Say { text } => say(&config, &text).await,
        Command::Login { token, email } => login(&config, &token, email),
        Command::Logout => {
            CredentialStore::in_dir(&config.data_dir).clear()?;
            println!("Signed out.");
            Ok(())
        }
        Command::Settings {
            enabled,
            speed,
            volume,
        } => settings(&config, enabled, speed, volume),
    }
}

/// Interactive console: typed lines are chat, slash commands drive the controller
async fn console(config: Config) -> anyhow::Result<()> {
    let credentials = CredentialStore::in_dir(&config.data_dir);
    let settings = SettingsBus::load(&config.data_dir);
    let dispatcher = Arc::new(HttpDispatcher::new(config.backend.clone())?);

    let builder = ControllerBuilder::new(dispatcher, credentials.clone(), settings.subscribe())
        .timing(config.timing)
        .assistant_voices(config.voice.assistant_voices.clone());

    let (recognizer, synthesizer) = voice_engines(&config, &builder)?;
    let (controller, handle) = builder.build(recognizer, synthesizer);
    let controller = tokio::spawn(controller.run());

    tracing::info!(backend = %config.backend.base_url, "jarvis ready");
    handle.sign_in(credentials.user());

    let printer = tokio::spawn(print_conversation(handle.clone()));
    let notices = tokio::spawn(print_notices(handle.clone()));

    println!("Type to chat. Commands: /listen /tasks /add <text> /done <id> /rm <id>");
    println!("Session: /login /logout /quit");
    println!("Voice: /voice on|off /speed <rate> /volume <0-1>");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !console_command(&handle, &credentials, &settings, line.trim()) {
                    break;
                }
            }
        }
    }

    handle.shutdown();
    controller.await?;
    printer.abort();
    notices.abort();
    Ok(())
}

/// Returns false when the console should exit
fn console_command(
    handle: &ControllerHandle,
    credentials: &CredentialStore,
    settings: &SettingsBus,
    line: &str,
) -> bool {
    let (command, arg) = line
        .split_once(' ')
        .map_or((line, ""), |(c, a)| (c, a.trim()));

    match command {
        "" => {}
        "/quit" | "/exit" => return false,
        "/listen" => handle.toggle_listening(),
        "/tasks" => print_tasks(&handle.snapshot()),
        "/refresh" => handle.refresh_tasks(),
        "/add" => handle.create_task(arg, None),
        "/done" => handle.set_task_completed(TaskId::new(arg), true),
        "/undo" => handle.set_task_completed(TaskId::new(arg), false),
        "/rm" => handle.delete_task(TaskId::new(arg)),
        "/login" => handle.sign_in(credentials.user()),
        "/logout" => handle.sign_out(),
        "/voice" | "/speed" | "/volume" => {
            match SettingsChange::parse(command.trim_start_matches('/'), arg) {
                // Takes effect from the next reply; the current one plays on
                Ok(change) => print_settings(settings.apply(change)),
                Err(e) => eprintln!("! {e}"),
            }
        }
        _ => handle.send_chat(line),
    }
    true
}

async fn print_conversation(handle: ControllerHandle) {
    let mut snapshots = handle.subscribe();
    let mut session: Option<String> = None;
    let mut printed = 0u64;
    let mut interim = String::new();

    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();

        if snapshot.session_id != session {
            session.clone_from(&snapshot.session_id);
            printed = 0;
            match &snapshot.user {
                Some(user) => println!("-- session for {} --", user.label()),
                None if session.is_some() => println!("-- guest session --"),
                None => println!("-- signed out --"),
            }
        }

        for message in snapshot.messages.iter() {
            if message.id <= printed {
                continue;
            }
            let speaker = match message.role {
                Role::User => "you",
                Role::Assistant => "JARVIS",
                Role::System => "system",
            };
            println!("[{speaker}] {}", message.text);
            printed = message.id;
        }

        if snapshot.interim != interim {
            interim.clone_from(&snapshot.interim);
            if !interim.is_empty() {
                println!("  ... {interim}");
            }
        }
    }
}

async fn print_notices(handle: ControllerHandle) {
    let mut notices = handle.notices();
    while let Ok(notice) = notices.recv().await {
        eprintln!("! {notice}");
    }
}

fn print_tasks(snapshot: &Snapshot) {
    if snapshot.tasks.is_empty() {
        println!("No tasks.");
        return;
    }
    for task in snapshot.tasks.iter() {
        let mark = if task.completed { "x" } else { " " };
        let when = task
            .scheduled_for
            .map(|at| format!(" @ {}", at.with_timezone(&chrono::Local).format("%b %-d %-I:%M %p")))
            .unwrap_or_default();
        println!("[{mark}] {} {}{when}", task.id, task.text);
    }
    println!("{} active", snapshot.active_tasks());
}

type Engines = (
    Option<Box<dyn RecognitionEngine>>,
    Option<Box<dyn SynthesisEngine>>,
);

/// Native engines, or none when voice is disabled or no API key is configured
fn voice_engines(config: &Config, builder: &ControllerBuilder) -> anyhow::Result<Engines> {
    if !config.voice.enabled {
        tracing::info!("voice disabled, typed chat only");
        return Ok((None, None));
    }

    let Some(api_key) = config.voice.openai_api_key.clone() else {
        tracing::warn!("OPENAI_API_KEY not set, voice unavailable");
        return Ok((None, None));
    };

    let stt = SpeechToText::new_whisper(api_key.clone(), config.voice.stt_model.clone())?;
    let tts = TextToSpeech::new_openai(api_key, config.voice.tts_model.clone())?;

    let recognizer =
        MicrophoneRecognizer::new(stt, builder.recognition_sink(), config.voice.idle_timeout);
    let synthesizer = CloudSynthesizer::new(
        tts,
        config.voice.tts_voice.clone(),
        config.timing.playback_delay,
        builder.synthesis_sink(),
    );

    Ok((Some(Box::new(recognizer)), Some(Box::new(synthesizer))))
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let microphone = Microphone::open()?;
    println!("Sample rate: {} Hz", jarvis_voice::voice::SAMPLE_RATE);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = microphone.take_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    drop(microphone);

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let samples = tone(440.0, Duration::from_secs(2), 0.3);
    println!("Playing {} samples...", samples.len());

    tokio::task::spawn_blocking(move || -> jarvis_voice::Result<_> {
        Speaker::open()?.play_blocking(samples, 1.0, &CancellationToken::new())
    })
    .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Speak text through the same TTS path the assistant uses
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    let api_key = config
        .voice
        .openai_api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is required"))?;
    let settings = SettingsBus::load(&config.data_dir).current().clamped();

    let tts = TextToSpeech::new_openai(api_key, config.voice.tts_model.clone())?;
    let voice = jarvis_voice::voice::select_voice(
        &jarvis_voice::voice::VOICE_CATALOG
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        &config.voice.assistant_voices,
    )
    .unwrap_or_else(|| config.voice.tts_voice.clone());

    println!("Speaking with voice {voice} at {:.2}x: \"{text}\"", settings.rate);
    let audio = tts.synthesize(text, &voice, settings.rate).await?;
    let samples = decode_mp3(&audio)?;

    let volume = settings.volume;
    tokio::task::spawn_blocking(move || -> jarvis_voice::Result<_> {
        Speaker::open()?.play_blocking(samples, volume, &CancellationToken::new())
    })
    .await??;

    Ok(())
}

fn login(config: &Config, token: &str, email: Option<String>) -> anyhow::Result<()> {
    let credentials = CredentialStore::in_dir(&config.data_dir);
    credentials.set_token(token)?;

    if let Some(email) = email {
        credentials.set_user(&UserProfile {
            id: None,
            email: Some(email),
            name: None,
        })?;
    }

    println!("Token stored in {}", credentials.path().display());
    Ok(())
}

fn settings(
    config: &Config,
    enabled: Option<bool>,
    speed: Option<f32>,
    volume: Option<f32>,
) -> anyhow::Result<()> {
    let bus = SettingsBus::load(&config.data_dir);

    let changes = [
        enabled.map(SettingsChange::Enabled),
        speed.map(SettingsChange::Rate),
        volume.map(SettingsChange::Volume),
    ];
    for change in changes.into_iter().flatten() {
        bus.apply(change);
    }

    print_settings(bus.current());
    Ok(())
}

fn print_settings(settings: VoiceSettings) {
    println!("voice enabled: {}", settings.enabled);
    println!("speed:         {:.2}", settings.rate);
    println!("volume:        {:.2}", settings.volume);
}
