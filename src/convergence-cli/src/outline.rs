//! Outline loading for the `--outline` flag.
//!
//! An outline is read from a local file or fetched from an `http(s)` URL,
//! then normalized into plain bullet text for the turn prompts.

use colored::Colorize;
use reqwest::Url;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum outline length, in characters.
pub const MAX_OUTLINE_CHARS: usize = 50_000;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("Convergence/", env!("CARGO_PKG_VERSION"));

/// A loaded outline and where it came from.
#[derive(Debug, Clone)]
pub struct Outline {
    pub text: String,
    pub source: String,
}

/// Load and normalize an outline.
///
/// Returns `None` (after printing a warning) when the source cannot be read
/// or is empty; generation then continues without an outline.
pub async fn load(source: &str) -> Option<Outline> {
    let source = source.trim();
    if source.is_empty() {
        return None;
    }

    let raw = if let Some(url) = as_web_url(source) {
        println!("   {} {}", "Fetching outline from".dimmed(), url.as_str().dimmed());
        fetch(url).await
    } else {
        println!("   {} {}", "Reading outline from".dimmed(), source.dimmed());
        read(Path::new(source)).await
    };

    let raw = match raw {
        Ok(raw) => raw,
        Err(message) => {
            warn!(source, "outline unavailable: {}", message);
            eprintln!(
                "{} {}",
                "Warning:".yellow().bold(),
                format!("{}. Continuing without an outline.", message).yellow()
            );
            return None;
        }
    };

    let text = normalize(&raw);
    if text.is_empty() {
        eprintln!(
            "{}",
            "Warning: outline is empty. Continuing without an outline.".yellow()
        );
        return None;
    }

    debug!(source, chars = text.chars().count(), "outline loaded");
    Some(Outline {
        text,
        source: source.to_string(),
    })
}

fn as_web_url(source: &str) -> Option<Url> {
    Url::parse(source)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
}

async fn fetch(url: Url) -> Result<String, String> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| format!("Failed to fetch URL: {}", e))?;

    response
        .text()
        .await
        .map_err(|e| format!("Failed to read response body: {}", e))
}

async fn read(path: &Path) -> Result<String, String> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| format!("File not found: {}", path.display()))?;
    if !metadata.is_file() {
        return Err(format!("Not a file: {}", path.display()));
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("Error reading file: {}", e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Trim, cap the length, drop blank lines and unify bullet markers.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let capped = match trimmed.char_indices().nth(MAX_OUTLINE_CHARS) {
        Some((cut, _)) => {
            eprintln!(
                "{}",
                format!("Warning: outline truncated to {} characters", MAX_OUTLINE_CHARS).yellow()
            );
            &trimmed[..cut]
        }
        None => trimmed,
    };

    capped
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.strip_prefix(['-', '*', '•']) {
            Some(rest) => format!("• {}", rest.trim()),
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
