//! Consumers and event streams
//!
//! Each named consumer owns one durable cursor `(cur_seq, cur_pos)`
//! persisted in its own checkpoint file, and at most one live
//! [`EventStream`] at a time. The stream pulls records through a
//! read-ahead buffer and moves an in-flight cursor `(new_seq, new_pos)`;
//! only `commit` makes that progress durable, `abort` discards it.
//!
//! State machine: Idle -> (create_stream) -> Streaming -> (commit |
//! abort | drop) -> Idle. Stream acquisition never blocks; refills are
//! timeout-bounded so a concurrent truncation cannot wedge a reader.

mod state;
mod stream;

pub use state::Consumer;
pub use stream::{EventStream, NextEvent};
