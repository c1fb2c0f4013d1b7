use anyhow::Result;
use lingostream::EngineConfig;
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/lingostream".to_string());
    let cfg = EngineConfig::load(&path)?;

    info!("LingoStream v0.1.0");
    info!("Session: {}", cfg.session_id);
    info!(
        "Languages: {} -> {}",
        cfg.source_language, cfg.target_language
    );
    info!("Audio source mode: {:?}", cfg.audio_source_mode);
    info!("Recording mode: {:?}", cfg.recording_mode);
    info!("Output directory: {}", cfg.output_dir.display());

    match cfg.validate() {
        Ok(()) => info!("Configuration is valid; supply a capture factory and a translator factory to run a session"),
        Err(e) => info!("Configuration incomplete: {}", e),
    }

    Ok(())
}
