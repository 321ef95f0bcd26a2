//! Stable protocol message codes (spec §6.1). Values are implementation
//! chosen — the spec requires only that they stay stable within a build —
//! and are distinct 64-bit constants.

/// Handshake + push-tasks opening verb.
pub const MSG_SEND_TASK: i64 = 1;
/// "send another task" — pool has room.
pub const MSG_SEND_MORE: i64 = 2;
/// "pool is full" — push-handler rejects further pushes this cycle.
pub const MSG_SEND_FULL: i64 = 3;
/// "task rejected" — `Put` failed between the `send_more` and the push.
pub const MSG_SEND_RJCT: i64 = 4;
/// Heartbeat verb: no further I/O, resets the idle timer.
pub const MSG_SEND_HEART: i64 = 5;
/// Pull-results opening verb, also used as the per-item ack.
pub const MSG_READ_RESULT: i64 = 6;
/// "no results queued" — ends the pull-results drain loop.
pub const MSG_READ_EMPTY: i64 = 7;
/// Process-exit verb.
pub const MSG_TERMINATE: i64 = 8;

/// Module returned a non-zero status from a call.
pub const RES_MODULE_ERROR: i64 = 9;
/// Module returned no answer bytes.
pub const RES_MODULE_NOANS: i64 = 10;
/// Module echoed a context that did not match what was supplied.
pub const RES_MODULE_CTXER: i64 = 11;
