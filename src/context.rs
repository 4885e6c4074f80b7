//! Per-call build context threaded through extraction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::ResolveError;

/// Carries the current document location plus cancellation and deadline.
///
/// Cloned on every hop; a hop into another document swaps the location.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    location: Option<Arc<str>>,
    cancellation: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_location(mut self, location: impl Into<Arc<str>>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Location of the document currently being extracted, if known.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Fail when the context was cancelled or its deadline has passed.
    pub fn check(&self) -> Result<(), ResolveError> {
        if self.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ResolveError::TimedOut);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_passes() {
        let ctx = BuildContext::new();
        assert!(ctx.check().is_ok());
        assert_eq!(ctx.location(), None);
    }

    #[test]
    fn location_is_swapped() {
        let ctx = BuildContext::new().with_location("/a.yaml");
        let next = ctx.clone().with_location("/b.yaml");
        assert_eq!(ctx.location(), Some("/a.yaml"));
        assert_eq!(next.location(), Some("/b.yaml"));
    }

    #[test]
    fn cancelled_context_fails() {
        let token = CancellationToken::new();
        let ctx = BuildContext::new().with_cancellation(token.clone());
        token.cancel();
        assert!(matches!(ctx.check(), Err(ResolveError::Cancelled)));
    }

    #[test]
    fn expired_deadline_fails() {
        let ctx = BuildContext::new().with_deadline(Instant::now());
        assert!(matches!(ctx.check(), Err(ResolveError::TimedOut)));
    }
}
