use sg_ratelimit::Interrupt;

/// Sets up a Ctrl+C handler that raises `interrupt` on shutdown signal
///
/// Every acquisition waiting on the interrupt unwinds without holding a unit.
pub fn setup(interrupt: Interrupt) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received");
        interrupt.raise();
    })
}
