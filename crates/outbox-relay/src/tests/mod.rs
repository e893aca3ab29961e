//! Behavioural tests for the outbox relay.
//!
//! - `harness.rs`     - FakeStore, RecordingPublisher and TestHarness
//! - `dispatch.rs`    - Routing, the success path and per-event isolation
//! - `failure.rs`     - Attempts, backoff scheduling and error truncation
//! - `ceiling.rs`     - Attempt ceiling and retry after failure
//! - `ordering.rs`    - Claim order, batch limits and clamped settings
//! - `lease.rs`       - Leased claims, lease expiry and lost leases
//! - `run_loop.rs`    - Fixed-delay loop, no overlap, shutdown
//! - `sqlite.rs`      - End-to-end over the SQLite store
