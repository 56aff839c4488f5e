use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_api::{AttendanceClient, AttendanceStatus};
use rollcall_core::Comparator;
use rollcall_hw::CameraSession;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod orchestrator;
mod ports;

use config::Config;
use orchestrator::{Orchestrator, Timeouts};
use ports::{HttpBackendPort, OnnxExtractorPort, V4lCameraPort};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-verified attendance capture agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a face and register it as the student's stored facial data
    Register {
        #[arg(short, long)]
        student_id: String,
    },
    /// Capture a face, verify it against the stored one, and mark attendance
    Verify {
        #[arg(short, long)]
        student_id: String,
        /// Attendance date (YYYY-MM-DD, defaults to today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Mark attendance manually, without camera verification
    Mark {
        #[arg(short, long)]
        student_id: String,
        /// present, absent, or late
        #[arg(long)]
        status: AttendanceStatus,
        /// Attendance date (YYYY-MM-DD, defaults to today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// List available camera devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Devices => {
            let devices = CameraSession::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for d in devices {
                println!("{}  {} ({})", d.path, d.name, d.driver);
            }
            return Ok(());
        }
        Commands::Register { student_id } => {
            let mut orch = build_orchestrator(&config)?;
            let report = orch.register(&student_id).await?;
            println!("Registered facial data for {student_id} (face id {})", report.face_id);
        }
        Commands::Verify { student_id, date } => {
            let date = date.unwrap_or_else(today);
            let mut orch = build_orchestrator(&config)?;
            let report = orch.verify(&student_id, date).await?;
            if report.status == AttendanceStatus::Present {
                println!(
                    "Verified {student_id}: distance {:.3} (threshold {:.2}), marked present for {date}",
                    report.outcome.distance, config.match_threshold
                );
            } else {
                println!(
                    "Face did not match stored profile for {student_id} (distance {:.3}, threshold {:.2}).",
                    report.outcome.distance, config.match_threshold
                );
                println!("Attendance recorded as absent for {date}. Re-run verify to retry explicitly.");
            }
        }
        Commands::Mark { student_id, status, date } => {
            let date = date.unwrap_or_else(today);
            let mut orch = build_orchestrator(&config)?;
            orch.mark_manual(&student_id, date, status).await?;
            println!("Marked {student_id} {status} for {date}");
        }
    }

    Ok(())
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn build_orchestrator(
    config: &Config,
) -> Result<Orchestrator<V4lCameraPort, OnnxExtractorPort, HttpBackendPort>> {
    let camera = V4lCameraPort {
        device: config.camera_device.clone(),
        warmup_frames: config.warmup_frames,
        capture_attempts: config.capture_attempts,
    };
    let extractor = OnnxExtractorPort::new(config.model_paths());
    let client = AttendanceClient::new(
        config.api_base_url.clone(),
        Duration::from_secs(config.submit_timeout_secs),
    )?;
    let timeouts = Timeouts {
        model_load: Duration::from_secs(config.model_load_timeout_secs),
        camera: Duration::from_secs(config.camera_timeout_secs),
        extract: Duration::from_secs(config.extract_timeout_secs),
        submit: Duration::from_secs(config.submit_timeout_secs),
    };

    Ok(Orchestrator::new(
        camera,
        extractor,
        HttpBackendPort::new(client),
        Comparator::new(config.match_threshold),
        timeouts,
    ))
}
