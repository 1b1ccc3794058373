use tracing::span::Span;

/// Logs errors that cannot be propagated any further, e.g. a failed repository during a
/// batch of registrations.
pub trait LogError {
    fn log_error(&self, error: impl Into<anyhow::Error>);
}

impl LogError for Span {
    fn log_error(&self, error: impl Into<anyhow::Error>) {
        let error = error.into();
        self.in_scope(|| {
            tracing::error!("Error: {error:?}");
        });
    }
}
