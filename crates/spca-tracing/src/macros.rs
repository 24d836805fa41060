//! Convenience macros over [`crate::performance`].

/// Create a [`crate::performance::PerformanceSpan`], optionally with extra fields.
///
/// ```rust
/// use spca_tracing::perf_span;
///
/// let _span = perf_span!("create_memory_objects", descriptors = 3);
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        $crate::debug!(span_name = $name, $($field = $value),+, "performance_span_start");
        $crate::performance::PerformanceSpan::new($name, None)
    }};
}

/// Emit a debug event tagged with `event = $name`.
///
/// ```rust
/// use spca_tracing::perf_event;
///
/// perf_event!("dataset_uploaded", bytes = 4096, transfers = 2);
/// ```
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {
        $crate::debug!(event = $name, $($field = $value),+)
    };
}

/// Evaluate a block and return `(result, duration_us)`.
///
/// ```rust
/// use spca_tracing::timed_block;
///
/// let (sum, _us) = timed_block!("sum", { (1..=10).sum::<i32>() });
/// assert_eq!(sum, 55);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        $crate::debug!(operation = $name, duration_us = duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_perf_span_macro() {
        let span = perf_span!("plain");
        assert_eq!(span.name(), "plain");
        let _with_fields = perf_span!("fields", bytes = 1024usize, count = 2);
    }

    #[test]
    fn test_perf_event_macro() {
        perf_event!("test_event", bytes = 100, label = "value");
    }

    #[test]
    fn test_timed_block_macro() {
        let (result, duration_us) = timed_block!("sleep", {
            thread::sleep(Duration::from_millis(5));
            7
        });
        assert_eq!(result, 7);
        assert!(duration_us >= 5_000);
    }

    #[test]
    fn test_timed_block_propagates_error() {
        let (result, _) = timed_block!("failing", { Result::<i32, &str>::Err("boom") });
        assert!(result.is_err());
    }
}
