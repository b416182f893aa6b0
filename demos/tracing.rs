use {
    logvault::{RollingEngineBuilder, RotationSize, TimeZone},
    tracing_subscriber::util::SubscriberInitExt,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let engine = RollingEngineBuilder::new("./logs/tracing.log")
        .archive_pattern("tracing-%d.%i.log.gz")
        .max_active_size(RotationSize::MB(10))
        .max_archive_count(3)
        .time_zone(TimeZone::Local)
        .build()?;

    let (non_blocking, _guard) = tracing_appender::non_blocking(engine);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .finish()
        .try_init()?;

    tracing::info!("this is an info message");
    tracing::warn!("this is a warning message");
    tracing::error!("this is an error message");

    Ok(())
}
