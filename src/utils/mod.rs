//! The `utils` module provides the pieces shared by every other module of
//! the gateway: the process-level error type and logging initialisation.

pub mod error;
pub mod logging;

pub use error::{GatewayError, Result};

#[cfg(test)]
mod tests {
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warning");
        logging::init("nonsense");
    }
}
