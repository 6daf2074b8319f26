use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use moodlens_hw::{Camera, CaptureConstraints};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "moodlens", about = "MoodLens mood detection CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status, including the most recent notice
    Status,
    /// Show the most recent detection result
    Mood,
    /// Save the current mood
    Save {
        /// Free-text notes stored with the mood
        #[arg(short, long, default_value = "")]
        notes: String,
    },
    /// List saved moods, newest first
    History,
    /// Release the camera and open it again (e.g. after granting access)
    Restart,
    /// List video capture devices
    Devices,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// Device path; defaults to the first capture device
        #[arg(short, long)]
        device: Option<String>,
        /// Write the captured frame as a PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[zbus::proxy(
    interface = "org.moodlens.MoodLens1",
    default_service = "org.moodlens.MoodLens1",
    default_path = "/org/moodlens/MoodLens1"
)]
trait MoodLens {
    async fn status(&self) -> zbus::Result<String>;
    async fn current_mood(&self) -> zbus::Result<String>;
    async fn save(&self, notes: &str) -> zbus::Result<String>;
    async fn history(&self) -> zbus::Result<String>;
    async fn restart_capture(&self) -> zbus::Result<()>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => print_json(&proxy().await?.status().await?)?,
        Commands::Mood => {
            let json = proxy().await?.current_mood().await?;
            let result: serde_json::Value = serde_json::from_str(&json)?;
            if result.is_null() {
                println!("No mood detected yet");
            } else {
                print_mood(&result);
            }
        }
        Commands::Save { notes } => {
            let json = proxy().await?.save(&notes).await?;
            let record: serde_json::Value = serde_json::from_str(&json)?;
            println!(
                "Saved {} ({})",
                record["mood"].as_str().unwrap_or("?"),
                record["id"].as_str().unwrap_or("?")
            );
        }
        Commands::History => {
            let json = proxy().await?.history().await?;
            let records: Vec<serde_json::Value> = serde_json::from_str(&json)?;
            if records.is_empty() {
                println!("No saved moods");
            }
            for r in &records {
                println!(
                    "{}  {:<10} {}",
                    r["createdAt"].as_str().unwrap_or("?"),
                    r["mood"].as_str().unwrap_or("?"),
                    r["notes"].as_str().unwrap_or("")
                );
            }
        }
        Commands::Restart => {
            proxy().await?.restart_capture().await?;
            println!("Capture restart requested; run `moodlens status` to follow it");
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test { device, output } => camera_test(device, output)?,
    }

    Ok(())
}

async fn proxy() -> Result<MoodLensProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("cannot connect to the session bus")?;
    MoodLensProxy::new(&conn)
        .await
        .context("moodlensd is not reachable; is it running?")
}

fn print_json(json: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_mood(result: &serde_json::Value) {
    println!(
        "{} ({})",
        result["dominantMood"].as_str().unwrap_or("?"),
        result["mode"].as_str().unwrap_or("?")
    );
    if let Some(distribution) = result["distribution"].as_object() {
        for (label, p) in distribution {
            let p = p.as_f64().unwrap_or(0.0);
            println!("  {label:<10} {:>5.1}%", p * 100.0);
        }
    }
    if let Some(reason) = result["diagnostics"]["fallbackReason"].as_str() {
        println!("  fallback: {reason}");
    }
}

fn camera_test(device: Option<String>, output: Option<PathBuf>) -> Result<()> {
    println!("Running camera diagnostics...");
    let constraints = CaptureConstraints {
        device,
        ..Default::default()
    };
    let mut camera = Camera::open(&constraints)?;
    println!(
        "Opened {} at {}x{} ({:?})",
        camera.device_path, camera.width, camera.height, camera.fourcc
    );

    let frame = camera.capture_frame()?;
    tracing::debug!(bytes = frame.data.len(), "frame captured");
    println!(
        "Frame {}: avg brightness {:.1}{}",
        frame.sequence,
        frame.avg_brightness(),
        if frame.is_dark { " (dark)" } else { "" }
    );

    if let Some(path) = output {
        let Some(image) = image::GrayImage::from_raw(frame.width, frame.height, frame.data) else {
            bail!("frame buffer does not match {}x{}", frame.width, frame.height);
        };
        image.save(&path)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}
