use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use tokio::sync::mpsc;

use count_cups_lib::{
    db::CupProfileInput,
    detection::{build_detector, DetectorTuning},
    export::{collect_export, write_export},
    sensing::DemoFeed,
    AppState, DetectionController, DetectorKind, TrackerEvent,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a synthetic drinking feed through the sip tracker", long_about = None)]
struct Args {
    /// Directory holding the database and settings
    #[arg(short, long, default_value = "count_cups_data")]
    data_dir: PathBuf,

    /// Number of drinking cycles to replay
    #[arg(long, default_value_t = 5)]
    cycles: u64,

    /// Synthetic frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Seed for frame jitter
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Use the landmark-model engine instead of the configured one
    #[arg(long)]
    landmarks: bool,

    /// Write a JSON export of today's history here when done
    #[arg(long)]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    count_cups_lib::init_logging();
    let args = Args::parse();

    let app = AppState::open(&args.data_dir)
        .with_context(|| format!("failed to open data directory {}", args.data_dir.display()))?;

    if app.db.list_cup_profiles().await?.is_empty() {
        let profile = app
            .tracker
            .create_cup_profile(CupProfileInput::new("Standard cup", 250, 10).as_default())
            .await?;
        info!("created default cup profile {} ({} ml)", profile.name, profile.size_ml);
    }

    let kind = if args.landmarks {
        DetectorKind::LandmarkModel
    } else {
        app.settings.detector()
    };
    let config = app.tracker.aggregator_config();
    let tuning = DetectorTuning {
        head_tilt_threshold_deg: config.head_tilt_threshold_deg,
        hand_face_distance_threshold_px: config.hand_face_distance_threshold_px,
    };
    let detector = build_detector(kind, tuning)
        .with_context(|| format!("no built-in detector for {}", kind.as_str()))?;

    let mut events = app.tracker.subscribe();
    let reporter = tokio::spawn(async move {
        let mut recorded = 0u64;
        while let Ok(event) = events.recv().await {
            match event {
                TrackerEvent::SipRecorded { event } => {
                    recorded += 1;
                    info!(
                        "sip #{recorded} at {} ({:.1} ml, confidence {:.2})",
                        event.timestamp.format("%H:%M:%S%.3f"),
                        event.ml_estimate,
                        event.confidence.unwrap_or_default()
                    );
                }
                TrackerEvent::SipDropped { reason } => warn!("sip dropped: {reason}"),
                TrackerEvent::StatsInvalidated { .. } => {}
            }
        }
        recorded
    });

    let (frame_tx, frame_rx) = mpsc::channel(args.fps.max(1) as usize * 2);
    let mut controller = DetectionController::new(app.tracker.clone());
    let session_id = controller.start(frame_rx, detector)?;
    info!("replaying {} cycles at {} fps (session {session_id})", args.cycles, args.fps);

    let feed = DemoFeed::new(Utc::now(), args.fps, args.seed);
    let frame_count = feed.cycle_frames() * args.cycles;
    for frame in feed.take(frame_count as usize) {
        frame_tx
            .send(frame)
            .await
            .context("detection loop stopped accepting frames")?;
    }
    drop(frame_tx);
    controller.drain().await?;

    let today = Utc::now().date_naive();
    let stats = app.tracker.get_daily_stats(today).await?;
    info!(
        "today: {} sips, {:.0} ml, {:.2} cups ({:.0}% of {} ml goal)",
        stats.total_sips,
        stats.total_ml,
        stats.total_cups,
        stats.progress_percentage,
        stats.goal_ml
    );

    if let Some(path) = args.export.as_deref() {
        let data = collect_export(&app.tracker, today, today).await?;
        write_export(path, &data)?;
    }

    // closes the event channel so the reporter can finish
    drop(controller);
    drop(app);
    let recorded = reporter.await.unwrap_or_default();
    info!("demo finished, {recorded} sips recorded this run");
    Ok(())
}
