use crate::domain::types::ProgressStage;

/// Percentage band owned by each stage.
pub fn stage_band(stage: ProgressStage) -> (f64, f64) {
    match stage {
        ProgressStage::Initializing | ProgressStage::Error => (0.0, 0.0),
        ProgressStage::Fetching => (10.0, 30.0),
        ProgressStage::Parsing => (30.0, 50.0),
        ProgressStage::Rendering => (50.0, 90.0),
        ProgressStage::Finalizing => (90.0, 100.0),
        ProgressStage::Complete => (100.0, 100.0),
    }
}

/// Scale byte progress into the stage's band; without a known total the
/// band floor is used.
pub fn calculate_progress_percentage(
    stage: ProgressStage,
    bytes_loaded: u64,
    total_bytes: Option<u64>,
) -> f64 {
    let (floor, ceiling) = stage_band(stage);
    match total_bytes {
        Some(total) if total > 0 => {
            let ratio = (bytes_loaded as f64 / total as f64).clamp(0.0, 1.0);
            floor + (ceiling - floor) * ratio
        }
        _ => floor,
    }
}
