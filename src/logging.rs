//! Log output for host applications
//!
//! The library only emits `tracing` events. Applications that do not install
//! their own subscriber can call [`init`] once at startup.

use tracing::Level;

/// Install a formatting subscriber printing events at `level` and above
///
/// Does nothing when a global subscriber is already set.
pub fn init(level: Level) {
    let _ = tracing_subscriber::fmt()
        // filter spans/events with the given level or higher.
        .with_max_level(level)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        init(Level::DEBUG);
        init(Level::INFO);
        tracing::info!("logging initialised");
    }
}
