use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("parley.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("parley.client.request_errors");
pub(crate) static CLIENT_TOKEN_REFRESHES: Counter = Counter::new("parley.client.token_refreshes");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("parley.client.request_duration_seconds");

pub(crate) static SOCKET_OPENED: Counter = Counter::new("parley.socket.opened");
pub(crate) static SOCKET_OPEN_FAILED: Counter = Counter::new("parley.socket.open_failed");
pub(crate) static SOCKET_CLOSED: Counter = Counter::new("parley.socket.closed");
pub(crate) static FRAMES_SENT: Counter = Counter::new("parley.socket.frames_sent");
pub(crate) static FRAMES_RECEIVED: Counter = Counter::new("parley.socket.frames_received");
pub(crate) static FRAMES_MALFORMED: Counter = Counter::new("parley.socket.frames_malformed");

pub(crate) static SESSION_TURNS: Counter = Counter::new("parley.session.turns");
pub(crate) static SESSION_SEND_REJECTED: Counter = Counter::new("parley.session.send_rejected");
pub(crate) static SESSION_STREAM_ERRORS: Counter = Counter::new("parley.session.stream_errors");
pub(crate) static SESSION_STALE_FRAMES: Counter = Counter::new("parley.session.stale_frames");
pub(crate) static SESSION_TURN_DURATION: Moments =
    Moments::new("parley.session.turn_duration_seconds");

pub(crate) static UPLOAD_BATCHES: Counter = Counter::new("parley.uploads.batches");
pub(crate) static UPLOAD_FAILURES: Counter = Counter::new("parley.uploads.failures");
pub(crate) static UPLOAD_FILES_REFUSED: Counter = Counter::new("parley.uploads.files_refused");

pub(crate) static HISTORY_PAGES: Counter = Counter::new("parley.history.pages");
pub(crate) static HISTORY_SEARCHES: Counter = Counter::new("parley.history.searches");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_counter(&CLIENT_TOKEN_REFRESHES);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&SOCKET_OPENED);
    collector.register_counter(&SOCKET_OPEN_FAILED);
    collector.register_counter(&SOCKET_CLOSED);
    collector.register_counter(&FRAMES_SENT);
    collector.register_counter(&FRAMES_RECEIVED);
    collector.register_counter(&FRAMES_MALFORMED);

    collector.register_counter(&SESSION_TURNS);
    collector.register_counter(&SESSION_SEND_REJECTED);
    collector.register_counter(&SESSION_STREAM_ERRORS);
    collector.register_counter(&SESSION_STALE_FRAMES);
    collector.register_moments(&SESSION_TURN_DURATION);

    collector.register_counter(&UPLOAD_BATCHES);
    collector.register_counter(&UPLOAD_FAILURES);
    collector.register_counter(&UPLOAD_FILES_REFUSED);

    collector.register_counter(&HISTORY_PAGES);
    collector.register_counter(&HISTORY_SEARCHES);
}
