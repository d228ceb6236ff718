#[cfg(test)]
mod tests {
    use super::super::logging::{try_init_logging, DEFAULT_LOG_FILTER};

    #[test]
    fn test_logging_initialization_is_idempotent() {
        // The first call may lose the race against another test's subscriber
        let _ = try_init_logging();
        assert!(!try_init_logging(), "A second install must be refused");

        tracing::info!("logging still works after a refused install");
    }

    #[test]
    fn test_default_filter_parses() {
        let filter = tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER);
        assert!(filter.is_ok());
    }
}
