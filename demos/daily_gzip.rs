use {
    logvault::{RollingEngineBuilder, TimeZone},
    std::time::Duration,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let engine = RollingEngineBuilder::new("./logs/daily.log")
        .archive_pattern("daily-%d.log.gz") // one gzip archive per UTC day
        .max_archive_count(7)
        .time_zone(TimeZone::UTC)
        .tick_interval(Duration::from_secs(60)) // rotate at midnight even when idle
        .build()?;

    for i in 1..=100 {
        engine.write_record(format!("Log entry #{i}: daily rotation demo\n").as_bytes())?;
    }
    engine.flush()?;

    engine.shutdown(Duration::from_secs(5));
    Ok(())
}
