//! Convergence CLI - AI conversation generator
//!
//! Generates a multi-speaker audio conversation about a topic, or voices a
//! previously saved conversation document.

mod outline;

use clap::Parser;
use colored::Colorize;
use convergence_core::audio::wav_duration_secs;
use convergence_core::conversation::CREDENTIAL_ENV_VAR;
use convergence_core::{
    Conversation, GenerationConfig, GenerationEvent, GenerationOrchestrator, GenerationResult,
    OpenAiSpeechSynthesizer, OpenAiTextGenerator, OutputKind, PipelineStage, Settings,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(
    name = "convergence",
    version,
    about = "AI conversation generator - turn a topic into a podcast-style audio file",
    long_about = "Generates a conversation transcript turn by turn with an OpenAI-compatible \
                  chat model, voices each line with a speech model and stitches the result \
                  into a single WAV file."
)]
struct Cli {
    /// Topic or situation the conversation is about
    #[arg(short, long, value_name = "PROMPT", required_unless_present = "conversation")]
    prompt: Option<String>,

    /// Target length in minutes
    #[arg(
        short,
        long,
        default_value_t = 10,
        value_parser = clap::value_parser!(u32).range(1..=60),
        value_name = "MINUTES"
    )]
    duration: u32,

    /// Tone of the conversation
    #[arg(short, long, default_value = "NA", value_name = "VIBE")]
    vibe: String,

    /// Output file path
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Outline file path or URL to steer the conversation
    #[arg(short = 'u', long, value_name = "FILE_OR_URL")]
    outline: Option<String>,

    /// Voice an existing conversation JSON document instead of generating one
    #[arg(short, long, value_name = "FILE", conflicts_with = "generate_transcript")]
    conversation: Option<PathBuf>,

    /// Only generate the transcript and save it as JSON
    #[arg(long)]
    generate_transcript: bool,

    /// Path to a .env file
    #[arg(short, long, value_name = "FILE")]
    env: Option<PathBuf>,

    /// Path to a TOML settings file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.env {
        Some(path) => {
            dotenvy::from_path(path)
                .map_err(|e| format!("Failed to load env file {}: {}", path.display(), e))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("convergence_core=info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();

    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Ok(api_base) = env::var("OPENAI_API_BASE").or_else(|_| env::var("OPENAI_BASE_URL")) {
        settings.service.api_base = api_base;
    }

    let api_key = env::var(CREDENTIAL_ENV_VAR).unwrap_or_else(|_| {
        eprintln!(
            "{}",
            format!("Warning: {} not set. API calls may fail.", CREDENTIAL_ENV_VAR).yellow()
        );
        String::new()
    });

    let text = OpenAiTextGenerator::new(&settings.service, api_key.clone())?;
    let speech = OpenAiSpeechSynthesizer::new(&settings.service, api_key)?;
    let orchestrator = GenerationOrchestrator::new(Arc::new(text), Arc::new(speech), settings)
        .with_callback(create_console_callback());

    let result = match &cli.conversation {
        Some(path) => {
            let mut conversation = Conversation::load(path)?;
            if let Some(output) = &cli.output {
                conversation.config.output_path = Some(output.clone());
            }

            print_header("Rendering conversation", &conversation.config);
            println!(
                "{} {} lines from {}",
                "Transcript:".bold(),
                conversation.transcript.len(),
                path.display()
            );
            print_rule();

            orchestrator.render_conversation(conversation).await
        }
        None => {
            let prompt = cli.prompt.clone().unwrap_or_default();
            let mut config = GenerationConfig::new(prompt, cli.duration)?.with_vibe(&cli.vibe);
            if let Ok(key) = env::var(CREDENTIAL_ENV_VAR) {
                config = config.with_api_key(key);
            }
            if let Some(output) = &cli.output {
                config = config.with_output_path(output);
            }
            if let Some(source) = &cli.outline {
                if let Some(outline) = outline::load(source).await {
                    config = config.with_outline(outline.text, outline.source);
                }
            }

            if cli.generate_transcript {
                print_header("Generating transcript", &config);
                print_rule();
                orchestrator.generate_transcript_only(config).await
            } else {
                print_header("Generating conversation", &config);
                print_rule();
                orchestrator.generate(config).await
            }
        }
    };

    print_result(&result);
    if !result.success {
        std::process::exit(1);
    }

    Ok(())
}

fn print_header(title: &str, config: &GenerationConfig) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  {} - {}", "Convergence".bold(), title)
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Prompt:".bold(), config.prompt.bright_white());
    println!("{} {} min", "Duration:".bold(), config.duration_minutes);
    println!("{} {}", "Vibe:".bold(), config.vibe);
    if let Some(source) = &config.outline_source {
        println!("{} {}", "Outline:".bold(), source.dimmed());
    }
    if let Some(path) = &config.output_path {
        println!("{} {}", "Output:".bold(), path.display());
    }
}

fn print_rule() {
    println!();
    println!("{}", "─".repeat(70).dimmed());
}

fn print_result(result: &GenerationResult) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());

    if !result.success {
        println!("{}", "  Generation failed.".bright_red().bold());
        if let Some(error) = &result.error {
            println!("  {}", error.red());
        }
        println!("{}", "═".repeat(70).bright_blue());
        println!();
        return;
    }

    match result.output_kind {
        Some(OutputKind::Transcript) if result.is_degraded() => {
            println!("{}", "  Transcript saved (audio unavailable).".yellow().bold());
        }
        Some(OutputKind::Transcript) => {
            println!("{}", "  Transcript saved.".bright_green().bold());
        }
        _ => {
            println!("{}", "  Conversation ready.".bright_green().bold());
        }
    }

    if let Some(path) = &result.output_path {
        println!("  {} {}", "File:".bold(), path.display());
        let seconds = match result.output_kind {
            Some(OutputKind::Audio) => std::fs::read(path).ok().and_then(|b| wav_duration_secs(&b)),
            _ => None,
        };
        if let Some(seconds) = seconds {
            println!("  {} {:.1}s", "Audio length:".bold(), seconds);
        }
    }
    if let Some(transcript) = &result.transcript {
        println!("  {} {}", "Lines:".bold(), transcript.len());
    }
    if let Some(elapsed) = result.elapsed_seconds {
        println!("  {} {}s", "Elapsed:".bold(), elapsed);
    }
    if let Some(note) = &result.error {
        println!("  {}", note.yellow());
    }

    println!("{}", "═".repeat(70).bright_blue());
    println!();
}

/// Create a callback that prints generation events to the console.
fn create_console_callback() -> Box<dyn Fn(GenerationEvent) + Send + Sync> {
    Box::new(move |event| match event {
        GenerationEvent::StageEntered(stage) => match stage {
            PipelineStage::TranscriptPending => {
                println!("{}", "📝 Writing transcript...".bright_magenta().bold());
            }
            PipelineStage::AudioPending => {
                println!();
                println!("{}", "🔊 Synthesizing audio...".bright_magenta().bold());
            }
            PipelineStage::AudioFailed => {
                println!(
                    "{}",
                    "⚠ Audio failed, saving transcript instead.".yellow().bold()
                );
            }
            _ => {}
        },
        GenerationEvent::AttemptStarted {
            stage,
            attempt,
            max_attempts,
        } if attempt > 0 => {
            println!(
                "{}",
                format!("↻ Retrying {} (attempt {}/{})", stage, attempt + 1, max_attempts)
                    .yellow()
            );
        }
        GenerationEvent::AttemptStarted { .. } => {}
        GenerationEvent::TurnGenerated {
            index,
            total,
            speaker,
            message,
        } => {
            println!(
                "{} {} {}",
                "▶".bright_cyan(),
                speaker.bright_cyan().bold(),
                format!("({}/{})", index + 1, total).dimmed()
            );
            for line in textwrap(&message, 66).lines() {
                println!("  {}", line);
            }
            println!();
        }
        GenerationEvent::LineSynthesized {
            index,
            total,
            speaker,
            voice,
        } => {
            println!(
                "  {} {} {}",
                format!("[{}/{}]", index + 1, total).dimmed(),
                speaker.bright_cyan(),
                format!("({})", voice).yellow()
            );
        }
        GenerationEvent::Finished { .. } => {
            // Handled in main
        }
    })
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_line_len + word_len + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word_len;
    }

    result
}
