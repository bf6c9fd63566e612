//! Request pipeline: one session per client connection.
//!
//! # Data Flow
//! ```text
//! hyper connection
//!     → PipelineHandle::dispatch (request-received)
//!     → state.rs Session::on_event → effects
//!     → driver.rs executes effects:
//!         - handler task (HandlerResponse / HandlerFailed / HandlerCompleted)
//!         - body pump (ResponseSent / ResponseWriteFailed)
//!         - progress listener (Finished)
//!     → connection told to close when the session terminates, along with any
//!       error response raised between requests
//! ```

pub mod driver;
pub mod state;

pub use driver::{
    CloseSignal, InboundRequest, MetricsProgressListener, PipelineDriver, PipelineEvent,
    PipelineHandle, RequestProgressListener,
};
pub use state::{CancelReason, Effect, Event, RequestOutcome, Session, State};
