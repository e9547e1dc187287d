//! Session task coordination.
//!
//! A session owns three kinds of background work: speech ingestion, a
//! language-model query, and speech synthesis. At most one task per stage is
//! live at a time. A newly finalized prompt preempts whatever query and
//! synthesis are still running, and a cancelled task can never write to the
//! client again.
//!
//! All stage transitions for one session go through a single coordinator loop
//! fed by a command queue; see [`Session::start`].

use murmur_core::types::Exchange;

mod coordinator;
pub mod ingestion;
pub mod query;
pub mod session;
pub mod sink;
mod synthesis;
pub mod task;

#[cfg(test)]
mod testing;

pub use ingestion::PromptAccumulator;
pub use session::{Session, SessionHandle, SessionState};
pub use sink::{ClientSink, TaskEmitter};
pub use task::TaskHandle;

/// Receives every prompt/response pair a session produces.
///
/// Persistence is the implementor's business; the session only reports.
pub trait ExchangeRecorder: Send + Sync {
    fn record_exchange(&self, chat_id: &str, exchange: &Exchange);
}
