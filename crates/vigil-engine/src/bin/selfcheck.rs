use std::path::Path;
use std::time::Duration;

use tracing::{error, info};
use vigil_capture::{test_connection, FfmpegOpener};
use vigil_engine::{init_tracing, EngineConfig};
use vigil_recognition::RecognitionClient;

/// Usage: `vigil-selfcheck [stream-uri ...]`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let config = EngineConfig::from_env();

    info!(
        data_dir = %config.data_dir.display(),
        captures_dir = %config.captures_dir.display(),
        "Starting self-check"
    );
    ensure_dir(&config.data_dir).await?;
    ensure_dir(&config.captures_dir).await?;
    ensure_ffmpeg()?;
    ensure_recognition(&config).await?;

    let mut failures = 0;
    for uri in std::env::args().skip(1) {
        let target = uri.clone();
        let report =
            tokio::task::spawn_blocking(move || test_connection(&target, None, Duration::from_secs(10)))
                .await?;
        if report.success {
            info!(
                uri = %uri,
                resolution = report.resolution.as_deref().unwrap_or("unknown"),
                fps = report.fps.unwrap_or(0.0),
                response_time_ms = report.response_time_ms,
                "Stream reachable"
            );
        } else {
            failures += 1;
            error!(
                uri = %uri,
                error = report.error.as_deref().unwrap_or("unknown error"),
                "Stream unreachable"
            );
        }
    }

    if failures > 0 {
        return Err(anyhow::anyhow!("{} stream(s) unreachable", failures));
    }
    info!("Self-check passed");
    Ok(())
}

async fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {}", path.display(), e))
}

fn ensure_ffmpeg() -> anyhow::Result<()> {
    FfmpegOpener::locate().map_err(|e| anyhow::anyhow!("ffmpeg/ffprobe not available: {}", e))?;
    Ok(())
}

async fn ensure_recognition(config: &EngineConfig) -> anyhow::Result<()> {
    let client = RecognitionClient::new(config.recognition.clone())?;
    if !client.health_check().await? {
        return Err(anyhow::anyhow!(
            "recognition backend at {} is not healthy",
            config.recognition.base_url
        ));
    }
    Ok(())
}
