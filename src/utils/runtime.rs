use anyhow::Result;

/// The tracker is a single-threaded cooperative event loop, so the host never needs more than a
/// current-thread runtime.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
