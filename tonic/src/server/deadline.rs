//! Deadline enforcement: parsing the client's `grpc-timeout` header,
//! reconciling it against a server-configured ceiling, and racing the
//! handler against whichever is shorter (`spec.md` §4.3, Deadline Manager).
//!
//! The manager is a small terminal-state machine with exactly two ways out
//! of the armed state: the handler finishes on its own (`try_set_complete`),
//! or the timer fires first (`deadline_exceeded`). Whichever branch wins,
//! the other becomes a no-op, and `dispose` lets a caller wait for an
//! in-flight firing to finish before it tears anything down.

use crate::{Code, Status};
use http::HeaderMap;
use pin_project::pin_project;
use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

const SECONDS_IN_HOUR: u64 = 60 * 60;
const SECONDS_IN_MINUTE: u64 = 60;

/// The longest single timer due-time this runtime schedules in one
/// `tokio::time::sleep`; deadlines longer than this are served by
/// rescheduling until the real deadline is reached, the value mirrors the
/// largest due-time a platform timer reliably accepts (`spec.md` §4.3, "a
/// long-deadline path is used if timeout exceeds the platform's max timer
/// due-time").
const MAX_TIMER_DUE_TIME: Duration = Duration::from_millis(u32::MAX as u64 - 2);

/// HTTP/2 stream-reset error code used when a deadline fires.
pub const HTTP2_CANCEL: u32 = 0x8;
/// HTTP/3 stream-reset error code used when a deadline fires.
pub const HTTP3_CANCEL: u32 = 0x010c;

/// The transport capability [`DeadlineManager::cancel_request`] consumes: a
/// way to reset the underlying stream with a protocol-specific error code
/// (`spec.md` §6, "a reset capability keyed by a protocol-specific error
/// code"). The concrete HTTP transport is out of this core's scope
/// (`spec.md` §1); a transport that wants a hard reset on deadline rather
/// than the cooperative cancellation token alone supplies one of these.
pub trait StreamReset: Send + Sync {
    /// Resets the stream with `error_code` (see [`HTTP2_CANCEL`]/[`HTTP3_CANCEL`]).
    fn reset_stream(&self, error_code: u32);
}

/// Parses the `grpc-timeout` header (`<value><unit>`, value up to 8 decimal
/// digits, unit one of `H`/`M`/`S`/`m`/`u`/`n`). Returns `Ok(None)` if the
/// header is absent; the header's own value on any parse failure, so callers
/// can log it (a malformed `grpc-timeout` is not itself a protocol error,
/// the call proceeds with no deadline).
pub(crate) fn try_parse_grpc_timeout(
    headers: &HeaderMap,
) -> Result<Option<Duration>, &http::HeaderValue> {
    let Some(val) = headers.get(crate::metadata::GRPC_TIMEOUT_HEADER) else {
        return Ok(None);
    };

    let (timeout_value, timeout_unit) = val
        .to_str()
        .map_err(|_| val)
        .and_then(|s| if s.is_empty() { Err(val) } else { Ok(s) })?
        .split_at(val.len() - 1);

    if timeout_value.len() > 8 {
        return Err(val);
    }

    let timeout_value: u64 = timeout_value.parse().map_err(|_| val)?;

    let duration = match timeout_unit {
        "H" => Duration::from_secs(timeout_value * SECONDS_IN_HOUR),
        "M" => Duration::from_secs(timeout_value * SECONDS_IN_MINUTE),
        "S" => Duration::from_secs(timeout_value),
        "m" => Duration::from_millis(timeout_value),
        "u" => Duration::from_micros(timeout_value),
        "n" => Duration::from_nanos(timeout_value),
        _ => return Err(val),
    };

    Ok(Some(duration))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Armed,
    CallCompleted,
    DeadlineFiring,
    DeadlineFired,
}

struct Inner {
    state: Mutex<Terminal>,
    status: Mutex<Option<Status>>,
    deadline_exceeded_complete_signal: Notify,
    cancel_source: CancellationToken,
    reset: Option<Arc<dyn StreamReset>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn on_timer_fired(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != Terminal::Armed {
                return;
            }
            *state = Terminal::DeadlineFiring;
        }

        *self.status.lock().unwrap() = Some(Status::new(Code::DeadlineExceeded, "Deadline Exceeded"));
        // Wakes anything racing this manager (`DeadlineRace`) so the status
        // above becomes the call's outcome and its trailers get written.
        self.cancel_source.cancel();

        *self.state.lock().unwrap() = Terminal::DeadlineFired;
        self.deadline_exceeded_complete_signal.notify_waiters();
    }
}

/// Tracks the effective deadline for a single call: the shorter of the
/// client's `grpc-timeout` and any server-configured ceiling, exposed as a
/// [`CancellationToken`] handler code and interceptors can observe (`spec.md`
/// §4.3 "handlers may poll/observe cancellation").
#[derive(Clone)]
pub struct DeadlineManager {
    deadline: Option<Duration>,
    inner: Arc<Inner>,
}

impl DeadlineManager {
    /// Builds a manager for one call, reconciling the parsed client timeout
    /// (if any) against `server_timeout`.
    pub(crate) fn new(client_timeout: Option<Duration>, server_timeout: Option<Duration>) -> Self {
        Self::with_reset(client_timeout, server_timeout, None)
    }

    /// Like [`DeadlineManager::new`], additionally wiring `reset` as the
    /// stream-reset capability [`DeadlineManager::cancel_request`] invokes
    /// on firing.
    pub(crate) fn with_reset(
        client_timeout: Option<Duration>,
        server_timeout: Option<Duration>,
        reset: Option<Arc<dyn StreamReset>>,
    ) -> Self {
        let deadline = match (client_timeout, server_timeout) {
            (None, None) => None,
            (Some(d), None) | (None, Some(d)) => Some(d),
            (Some(client), Some(server)) => Some(std::cmp::min(client, server)),
        };

        let inner = Arc::new(Inner {
            state: Mutex::new(Terminal::Armed),
            status: Mutex::new(None),
            deadline_exceeded_complete_signal: Notify::new(),
            cancel_source: CancellationToken::new(),
            reset,
            timer: Mutex::new(None),
        });

        if let Some(timeout) = deadline {
            let handle = spawn_timer(inner.clone(), timeout);
            *inner.timer.lock().unwrap() = Some(handle);
        }

        DeadlineManager { deadline, inner }
    }

    /// Parses `headers` for `grpc-timeout` and builds a manager against
    /// `server_timeout`; parse failures are treated as "no client deadline"
    /// (`spec.md` §4.3, edge case: malformed `grpc-timeout`).
    pub(crate) fn from_headers(headers: &HeaderMap, server_timeout: Option<Duration>) -> Self {
        let client_timeout = try_parse_grpc_timeout(headers).unwrap_or_else(|bad| {
            tracing::trace!(value = ?bad, "ignoring malformed grpc-timeout header");
            None
        });
        DeadlineManager::new(client_timeout, server_timeout)
    }

    /// The effective deadline for this call, if either side set one.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// A token that transitions to cancelled when the deadline elapses, or
    /// when [`DeadlineManager::cancel_request`] is called directly. Handler
    /// code may hold a clone to check `is_cancelled()` at cooperation points
    /// in long-running work.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel_source.clone()
    }

    /// From the handler's normal finish path: claims the "call completed
    /// normally" terminal branch. Returns `true` iff the deadline-firing
    /// branch had not yet been claimed, in which case the timer callback
    /// (if it fires later) becomes a no-op (`spec.md` §4.3, `try_set_complete`).
    pub(crate) fn try_set_complete(&self) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        if *state != Terminal::Armed {
            return false;
        }
        *state = Terminal::CallCompleted;
        drop(state);

        if let Some(handle) = self.inner.timer.lock().unwrap().take() {
            handle.abort();
        }
        true
    }

    /// The transport-level counterpart to firing on a deadline: resets the
    /// underlying stream with the protocol cancel code if a [`StreamReset`]
    /// capability was supplied, otherwise falls back to aborting the request
    /// through the cancellation token alone (`spec.md` §4.3, `cancel_request`).
    pub(crate) fn cancel_request(&self) {
        if let Some(reset) = &self.inner.reset {
            reset.reset_stream(HTTP2_CANCEL);
        }
        self.inner.cancel_source.cancel();
    }

    /// Awaits disposal: if the timer's firing branch is still in progress,
    /// waits for it to finish before returning, so resources it touches are
    /// never released mid-callback (`spec.md` §4.3, `dispose`).
    pub(crate) async fn dispose(&self) {
        loop {
            let firing = { *self.inner.state.lock().unwrap() == Terminal::DeadlineFiring };
            if !firing {
                return;
            }
            self.inner.deadline_exceeded_complete_signal.notified().await;
        }
    }

    fn take_deadline_status(&self) -> Option<Status> {
        self.inner.status.lock().unwrap().clone()
    }

    /// Races `fut` against the deadline, returning `Status::deadline_exceeded`
    /// (message `"Deadline Exceeded"`) if it elapses first. Also trips the
    /// [`CancellationToken`] so in-flight handler code observing it can stop
    /// early.
    pub(crate) fn race<F, T>(&self, fut: F) -> DeadlineRace<F>
    where
        F: Future<Output = Result<T, Status>>,
    {
        DeadlineRace {
            inner: fut,
            cancelled: self.inner.cancel_source.clone().cancelled_owned(),
            manager: self.clone(),
        }
    }
}

impl Default for DeadlineManager {
    fn default() -> Self {
        DeadlineManager::new(None, None)
    }
}

impl std::fmt::Debug for DeadlineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineManager")
            .field("deadline", &self.deadline)
            .field("state", &*self.inner.state.lock().unwrap())
            .finish()
    }
}

fn spawn_timer(inner: Arc<Inner>, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut remaining = timeout;
        loop {
            if remaining <= MAX_TIMER_DUE_TIME {
                tokio::time::sleep(remaining).await;
                break;
            }
            tokio::time::sleep(MAX_TIMER_DUE_TIME).await;
            remaining -= MAX_TIMER_DUE_TIME;
        }
        inner.on_timer_fired();
    })
}

#[pin_project]
pub(crate) struct DeadlineRace<F> {
    #[pin]
    inner: F,
    #[pin]
    cancelled: WaitForCancellationFutureOwned,
    manager: DeadlineManager,
}

impl<F, T> Future for DeadlineRace<F>
where
    F: Future<Output = Result<T, Status>>,
{
    type Output = Result<T, Status>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Poll::Ready(result) = this.inner.poll(cx) {
            this.manager.try_set_complete();
            return Poll::Ready(result);
        }

        if this.cancelled.poll(cx).is_ready() {
            if let Some(status) = this.manager.take_deadline_status() {
                return Poll::Ready(Err(status));
            }
            // Cancelled for some other reason (e.g. a transport abort
            // sharing this token) with no deadline status recorded; keep
            // waiting on the handler, which is expected to observe the same
            // token and finish on its own.
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn header_map(value: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(v) = value {
            map.insert(
                crate::metadata::GRPC_TIMEOUT_HEADER,
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn parses_each_unit() {
        assert_eq!(
            try_parse_grpc_timeout(&header_map(Some("3H"))).unwrap(),
            Some(Duration::from_secs(3 * 3600))
        );
        assert_eq!(
            try_parse_grpc_timeout(&header_map(Some("13m"))).unwrap(),
            Some(Duration::from_millis(13))
        );
        assert_eq!(
            try_parse_grpc_timeout(&header_map(Some("82n"))).unwrap(),
            Some(Duration::from_nanos(82))
        );
    }

    #[test]
    fn rejects_too_many_digits() {
        assert!(try_parse_grpc_timeout(&header_map(Some("123456789H"))).is_err());
    }

    #[test]
    fn rejects_invalid_unit() {
        assert!(try_parse_grpc_timeout(&header_map(Some("82f"))).is_err());
    }

    #[test]
    fn absent_header_is_no_deadline() {
        assert_eq!(try_parse_grpc_timeout(&header_map(None)).unwrap(), None);
    }

    #[test]
    fn shorter_of_client_and_server_wins() {
        let manager = DeadlineManager::new(Some(Duration::from_secs(5)), Some(Duration::from_secs(1)));
        assert_eq!(manager.deadline(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn race_reports_deadline_exceeded_with_the_exact_message() {
        let manager = DeadlineManager::new(Some(Duration::from_millis(1)), None);
        let never = std::future::pending::<Result<(), Status>>();
        let result = manager.race(never).await;
        let status = result.unwrap_err();
        assert_eq!(status.code(), Code::DeadlineExceeded);
        assert_eq!(status.message(), "Deadline Exceeded");
        assert!(manager.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn handler_finishing_first_claims_call_completed_and_disarms_the_timer() {
        let manager = DeadlineManager::new(Some(Duration::from_millis(20)), None);
        let result = manager.race(async { Ok::<_, Status>(7) }).await;
        assert_eq!(result.unwrap(), 7);

        // Give the (now-aborted) timer a chance to fire if it hadn't been
        // disarmed; if it ran it would cancel the token, which must not
        // happen once the call completed normally.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!manager.cancellation_token().is_cancelled());
    }

    #[test]
    fn try_set_complete_is_one_shot() {
        let manager = DeadlineManager::new(None, None);
        assert!(manager.try_set_complete());
        assert!(!manager.try_set_complete());
    }

    #[tokio::test]
    async fn dispose_returns_immediately_once_firing_has_finished() {
        let manager = DeadlineManager::new(Some(Duration::from_millis(1)), None);
        let never = std::future::pending::<Result<(), Status>>();
        let _ = manager.race(never).await;
        // `on_timer_fired` runs to completion synchronously inside the
        // spawned task before the race future ever observes cancellation,
        // so by the time we get here there's nothing left to await.
        manager.dispose().await;
    }
}
