use anyhow::{Context, Result};
use clap::Parser;
use interviewflow::audio::{AudioBackendConfig, AudioBackendFactory, AudioSource};
use interviewflow::store::{Origin, SessionState, SessionStatus};
use interviewflow::{
    CapturePipeline, ClientError, Config, CreateSessionRequest, HttpSessionService,
    InterviewSession, InterviewType, MicrophoneBackend, PlanTier, StoreHandle,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "interviewflow")]
#[command(about = "Practice a live voice interview from the terminal")]
struct Args {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/interviewflow")]
    config: String,

    /// general, behavioral or technical
    #[arg(short = 't', long, default_value = "general")]
    interview_type: InterviewType,

    /// free or premium
    #[arg(long, default_value = "free")]
    tier: PlanTier,

    /// Resume text file to send with the session request
    #[arg(long)]
    resume: Option<PathBuf>,

    #[arg(long)]
    job_description: Option<String>,

    #[arg(long)]
    company_culture: Option<String>,

    /// Input device name (defaults to the system microphone)
    #[arg(short, long)]
    device: Option<String>,

    /// Print available input devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        let devices = MicrophoneBackend::list_input_devices()
            .context("Failed to enumerate input devices")?;
        if devices.is_empty() {
            println!("No input devices found");
        }
        for name in devices {
            println!("{}", name);
        }
        return Ok(());
    }

    let cfg = Config::load(&args.config)?;
    info!("{} starting", cfg.service.name);

    let mut request = CreateSessionRequest::new(args.interview_type, args.tier);
    if let Some(path) = &args.resume {
        let resume = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read resume: {}", path.display()))?;
        request.resume_data = Some(resume);
    }
    request.job_description = args.job_description.clone();
    request.company_culture = args.company_culture.clone();

    let source = match args.device.clone() {
        Some(name) => AudioSource::Microphone(name),
        None => AudioSource::DefaultMicrophone,
    };
    let backend = AudioBackendFactory::create(source, AudioBackendConfig::from(&cfg.audio))
        .context("Failed to create audio backend")?;
    let capture = CapturePipeline::new(backend, cfg.audio.clone());

    let (store, store_task) = StoreHandle::spawn();
    let session = InterviewSession::new(store.clone(), &cfg.channel, capture);
    let service = HttpSessionService::new(&cfg.service)?;

    if let Err(e) = service.health().await {
        warn!("Session service health check failed: {}", e);
    }

    match session.start_from_service(&service, &request).await {
        Ok(created) => info!("Connected to session {}", created.session_id),
        Err(ClientError::Service(e)) => {
            eprintln!("{}", e.user_message());
            session.shutdown().await;
            return Err(e).context("Failed to create interview session");
        }
        // The channel keeps retrying in the background
        Err(e) => warn!("{}", e),
    }

    if let Err(e) = session.start_recording().await {
        eprintln!("{}", e.user_message());
        if e.is_permission() {
            eprintln!("Continuing without microphone input");
        }
    }

    println!("Interview started. Press Ctrl+C to end.");
    render(&session).await;

    info!("Ending interview");
    session.shutdown().await;
    store.flush().await;
    print_summary(&store.snapshot());

    drop(session);
    drop(store);
    if let Err(e) = store_task.await {
        warn!("Store task failed: {}", e);
    }

    Ok(())
}

/// Print store changes until the session completes or Ctrl-C
async fn render(session: &InterviewSession) {
    let mut state_rx = session.store().subscribe();
    let level_rx = session.subscribe_level();
    let mut view = View::default();
    let mut meter = tokio::time::interval(Duration::from_millis(250));

    let initial = state_rx.borrow_and_update().clone();
    view.render(&initial);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                view.render(&state);
                if state.is_completed() {
                    println!("The interview has ended.");
                    break;
                }
                if state.status() == Some(SessionStatus::Error) {
                    break;
                }
            }
            _ = meter.tick() => {
                let level = *level_rx.borrow();
                eprint!("\r{}", level_bar(level));
                let _ = std::io::stderr().flush();
            }
        }
    }
}

/// How much of the store has been printed so far
#[derive(Default)]
struct View {
    messages: usize,
    feedback: usize,
    error: Option<String>,
}

impl View {
    fn render(&mut self, state: &SessionState) {
        // Reset or a new session shrinks the logs
        if state.messages.len() < self.messages || state.feedback.len() < self.feedback {
            self.messages = 0;
            self.feedback = 0;
        }

        for message in &state.messages[self.messages..] {
            let who = match message.origin {
                Origin::Local => "You",
                Origin::Remote => "Interviewer",
            };
            println!("\r{}: {}", who, message.content);
        }
        self.messages = state.messages.len();

        for item in &state.feedback[self.feedback..] {
            let score = item
                .score
                .map(|s| format!(" ({:.0}/100)", s))
                .unwrap_or_default();
            println!("\r  feedback{}: {}", score, item.content);
            for suggestion in item.suggestions.iter().flatten() {
                println!("\r    - {}", suggestion);
            }
        }
        self.feedback = state.feedback.len();

        if state.connectivity.last_error != self.error {
            if let Some(error) = &state.connectivity.last_error {
                println!("\r! {}", error);
            }
            self.error = state.connectivity.last_error.clone();
        }
    }
}

fn level_bar(level: f32) -> String {
    const WIDTH: usize = 20;
    let filled = ((level.clamp(0.0, 1.0) * WIDTH as f32).round() as usize).min(WIDTH);
    format!("mic [{}{}]", "#".repeat(filled), " ".repeat(WIDTH - filled))
}

fn print_summary(state: &SessionState) {
    let Some(session) = &state.session else {
        return;
    };
    let duration = session
        .end_time
        .map(|end| (end - session.start_time).num_seconds())
        .unwrap_or(0);

    println!(
        "\rSession {} ({}): {:?}, {} messages, {} feedback items, {}s",
        session.id,
        session.interview_type,
        session.status,
        state.messages.len(),
        state.feedback.len(),
        duration
    );

    let scores: Vec<f32> = state.feedback.iter().filter_map(|f| f.score).collect();
    if !scores.is_empty() {
        let average = scores.iter().sum::<f32>() / scores.len() as f32;
        println!("Average score: {:.0}/100", average);
    }
}
