use {
    logvault::{RollingEngineBuilder, RotationSize},
    std::time::Duration,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let engine = RollingEngineBuilder::new("./logs/sized.log")
        .archive_pattern("sized-%d.%i.log.gz") // %i keeps same-day archives unique
        .max_active_size(RotationSize::KB(64))
        .max_archive_count(5)
        .file_mode(0o640) // owner rw, group r, others none
        .build()?;

    // Enough volume to trigger several size-based rotations.
    for i in 1..=10_000 {
        engine.write_record(
            format!("Log entry #{i}: this message contributes to the active file size\n")
                .as_bytes(),
        )?;
    }

    engine.shutdown(Duration::from_secs(5));
    Ok(())
}
