//! Progress reporting and cancellation for long-running operations.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How a cancellable operation ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// The completed value, if any.
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Cancelled => None,
        }
    }
}

/// Forwards percentages to a callback.
///
/// Values are clamped to 100. A value not above the last one delivered is
/// dropped, so the callback sees a strictly increasing sequence.
pub struct ProgressReporter<F: FnMut(u8)> {
    callback: F,
    last: Option<u8>,
}

impl<F: FnMut(u8)> ProgressReporter<F> {
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            last: None,
        }
    }

    pub fn report(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.last.map_or(true, |last| percent > last) {
            self.last = Some(percent);
            (self.callback)(percent);
        }
    }

    /// Report `done / total` of the way from `start` to `end`.
    ///
    /// An unknown (zero) total reports `start`.
    pub fn report_fraction(&mut self, done: u64, total: u64, start: u8, end: u8) {
        let span = u64::from(end.saturating_sub(start));
        let offset = if total == 0 {
            0
        } else {
            (done.min(total) * span) / total
        };
        // offset <= span <= 100
        self.report(start.saturating_add(offset as u8));
    }

    /// Last value delivered, if any.
    pub fn last(&self) -> Option<u8> {
        self.last
    }
}

/// Cancel `token` once `after` has elapsed.
///
/// The returned task ends early if the token is cancelled by someone else.
pub fn cancel_after(token: &CancellationToken, after: Duration) -> JoinHandle<()> {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(after) => token.cancel(),
            _ = token.cancelled() => {}
        }
    })
}
