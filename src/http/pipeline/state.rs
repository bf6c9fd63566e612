//! Per-connection request state machine.
//!
//! # Responsibilities
//! - Track one in-flight request per connection and what has happened to it
//! - Decide, for every event, the next state and the effects to run
//! - Guarantee one response, at most one upstream cancellation and exactly one
//!   completion report per accepted request
//!
//! # Design Decisions
//! - The transition function performs no I/O; the driver executes effects
//! - Events that make no sense in the current state are logged and ignored
//! - Request and response types are generic so transitions are testable
//!   without sockets

use axum::http::{Response, StatusCode};

use crate::error::ProxyError;
use crate::http::request::{RequestId, RequestInfo};
use crate::http::response::ErrorResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AcceptingRequests,
    WaitingForResponse,
    SendingResponse,
    SendingResponseClientClosed,
    Terminated,
}

/// Something that happened on the connection or in the handler.
pub enum Event<R, S> {
    RequestReceived(R),
    HandlerResponse { request_id: RequestId, response: S },
    /// The handler finished without producing a response.
    HandlerCompleted { request_id: RequestId },
    HandlerFailed { request_id: RequestId, error: ProxyError },
    ResponseSent,
    ResponseWriteFailed(ProxyError),
    /// The peer closed the connection.
    ChannelInactive,
    ChannelException(ProxyError),
}

impl<R, S> Event<R, S> {
    pub fn name(&self) -> &'static str {
        match self {
            Event::RequestReceived(_) => "request_received",
            Event::HandlerResponse { .. } => "handler_response",
            Event::HandlerCompleted { .. } => "handler_completed",
            Event::HandlerFailed { .. } => "handler_failed",
            Event::ResponseSent => "response_sent",
            Event::ResponseWriteFailed(_) => "response_write_failed",
            Event::ChannelInactive => "channel_inactive",
            Event::ChannelException(_) => "channel_exception",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A response with this status was sent or attempted.
    Completed(StatusCode),
    /// The request ended without a response.
    Terminated,
}

/// Why a request was cut short, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    SpuriousRequest,
    ResponseWriteError,
    ChannelInactive,
    ChannelExceptionWhileSendingResponse,
    ChannelExceptionWhileWaitingForResponse,
    ResponseError,
    HandlerCompletedTooSoon,
    ProtocolViolation,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::SpuriousRequest => "spurious_request",
            CancelReason::ResponseWriteError => "response_write_error",
            CancelReason::ChannelInactive => "channel_inactive",
            CancelReason::ChannelExceptionWhileSendingResponse => {
                "channel_exception_while_sending_response"
            }
            CancelReason::ChannelExceptionWhileWaitingForResponse => {
                "channel_exception_while_waiting_for_response"
            }
            CancelReason::ResponseError => "response_error",
            CancelReason::HandlerCompletedTooSoon => "handler_completed_too_soon",
            CancelReason::ProtocolViolation => "protocol_violation",
        }
    }
}

/// Work for the driver, in the order it must be carried out.
#[derive(Debug)]
pub enum Effect<R, S> {
    InvokeHandler(R),
    SendResponse(S),
    SendErrorResponse(ErrorResponse),
    /// Stop the handler and drop the upstream body.
    CancelUpstream,
    /// Feed a buffered request back in as a new `RequestReceived`.
    Redeliver(R),
    Cancelled(CancelReason),
    Finished {
        request_id: RequestId,
        outcome: RequestOutcome,
    },
    Close,
}

pub trait PipelineRequest {
    fn info(&self) -> &RequestInfo;
}

pub trait PipelineResponse {
    fn status(&self) -> StatusCode;
}

impl<B> PipelineResponse for Response<B> {
    fn status(&self) -> StatusCode {
        Response::status(self)
    }
}

/// State of one client connection.
pub struct Session<R, S> {
    state: State,
    ongoing: Option<RequestInfo>,
    response_status: Option<StatusCode>,
    premature: Option<R>,
    upstream_live: bool,
    finished: bool,
    _response: std::marker::PhantomData<fn() -> S>,
}

impl<R, S> Default for Session<R, S>
where
    R: PipelineRequest,
    S: PipelineResponse,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R, S> Session<R, S>
where
    R: PipelineRequest,
    S: PipelineResponse,
{
    pub fn new() -> Self {
        Self {
            state: State::AcceptingRequests,
            ongoing: None,
            response_status: None,
            premature: None,
            upstream_live: false,
            finished: false,
            _response: std::marker::PhantomData,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn current_request(&self) -> Option<&RequestInfo> {
        self.ongoing.as_ref()
    }

    pub fn is_terminated(&self) -> bool {
        self.state == State::Terminated
    }

    /// Apply one event and return the effects to execute.
    pub fn on_event(&mut self, event: Event<R, S>) -> Vec<Effect<R, S>> {
        let mut effects = Vec::new();

        match (self.state, event) {
            (State::Terminated, event) => {
                tracing::trace!(event = event.name(), "Event after termination ignored");
            }

            // AcceptingRequests
            (State::AcceptingRequests, Event::RequestReceived(request)) => {
                self.start(request, &mut effects);
            }
            (State::AcceptingRequests, Event::ChannelInactive) => {
                self.terminate(&mut effects);
            }
            (State::AcceptingRequests, Event::ChannelException(error)) => {
                if !error.is_bare_io() {
                    effects.push(Effect::SendErrorResponse(ErrorResponse::from_error(&error)));
                }
                tracing::debug!(error = %error, "Connection failed between requests");
                self.terminate(&mut effects);
            }

            // WaitingForResponse
            (State::WaitingForResponse, Event::RequestReceived(request)) => {
                self.buffer_premature(request, &mut effects);
            }
            (State::WaitingForResponse, Event::HandlerResponse { request_id, response }) => {
                if self.is_current(request_id) {
                    self.response_status = Some(response.status());
                    self.state = State::SendingResponse;
                    effects.push(Effect::SendResponse(response));
                } else {
                    self.stale("handler_response", request_id);
                }
            }
            (State::WaitingForResponse, Event::HandlerCompleted { request_id }) => {
                if self.is_current(request_id) {
                    tracing::error!(
                        state = ?self.state,
                        request = ?self.ongoing,
                        "Handler completed without a response"
                    );
                    self.upstream_live = false;
                    effects.push(Effect::Cancelled(CancelReason::HandlerCompletedTooSoon));
                    let status = self.respond_with_error(
                        ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR),
                        &mut effects,
                    );
                    self.finish(RequestOutcome::Completed(status), &mut effects);
                    self.terminate(&mut effects);
                } else {
                    self.stale("handler_completed", request_id);
                }
            }
            (State::WaitingForResponse, Event::HandlerFailed { request_id, error }) => {
                if !self.is_current(request_id) {
                    self.stale("handler_failed", request_id);
                } else if error.is_consumer_disconnected() {
                    self.upstream_live = false;
                    effects.push(Effect::Cancelled(CancelReason::ChannelInactive));
                    self.finish(RequestOutcome::Terminated, &mut effects);
                    self.terminate(&mut effects);
                } else {
                    let response = ErrorResponse::from_error(&error);
                    if response.status.is_server_error() {
                        tracing::error!(
                            state = ?self.state,
                            request = ?self.ongoing,
                            error = %error,
                            status = %response.status,
                            "Request failed"
                        );
                    } else {
                        tracing::info!(error = %error, status = %response.status, "Request rejected");
                    }
                    self.upstream_live = false;
                    effects.push(Effect::Cancelled(CancelReason::ResponseError));
                    let status = self.respond_with_error(response, &mut effects);
                    self.finish(RequestOutcome::Completed(status), &mut effects);
                    self.terminate(&mut effects);
                }
            }
            (State::WaitingForResponse, Event::ChannelInactive) => {
                effects.push(Effect::Cancelled(CancelReason::ChannelInactive));
                self.cancel_upstream(&mut effects);
                self.finish(RequestOutcome::Terminated, &mut effects);
                self.terminate(&mut effects);
            }
            (State::WaitingForResponse, Event::ChannelException(error)) => {
                effects.push(Effect::Cancelled(
                    CancelReason::ChannelExceptionWhileWaitingForResponse,
                ));
                self.cancel_upstream(&mut effects);
                if error.is_bare_io() {
                    tracing::debug!(error = %error, "Client transport failed while waiting for response");
                    self.finish(RequestOutcome::Terminated, &mut effects);
                } else {
                    tracing::warn!(error = %error, request = ?self.ongoing, "Client error while waiting for response");
                    let status =
                        self.respond_with_error(ErrorResponse::from_error(&error), &mut effects);
                    self.finish(RequestOutcome::Completed(status), &mut effects);
                }
                self.terminate(&mut effects);
            }

            // SendingResponse
            (State::SendingResponse, Event::RequestReceived(request)) => {
                if self.premature.is_none() {
                    self.premature = Some(request);
                } else {
                    tracing::warn!(
                        request = ?self.ongoing,
                        "Second request received while sending a response"
                    );
                    effects.push(Effect::Cancelled(CancelReason::ProtocolViolation));
                    self.cancel_upstream(&mut effects);
                    self.finish(RequestOutcome::Terminated, &mut effects);
                    self.terminate(&mut effects);
                }
            }
            (State::SendingResponse, Event::HandlerFailed { request_id, error }) => {
                tracing::warn!(
                    request_id = %request_id,
                    error = %error,
                    "Handler failed after the response started"
                );
            }
            (State::SendingResponse, Event::ResponseSent) => {
                self.upstream_live = false;
                let status = self.response_status.unwrap_or(StatusCode::OK);
                self.finish(RequestOutcome::Completed(status), &mut effects);

                let keep_alive = self.ongoing.as_ref().is_some_and(|info| info.keep_alive);
                if keep_alive {
                    self.reset();
                    if let Some(request) = self.premature.take() {
                        effects.push(Effect::Redeliver(request));
                    }
                } else {
                    self.terminate(&mut effects);
                }
            }
            (State::SendingResponse, Event::ResponseWriteFailed(error)) => {
                tracing::info!(error = %error, request = ?self.ongoing, "Failed to write response");
                effects.push(Effect::Cancelled(CancelReason::ResponseWriteError));
                self.cancel_upstream(&mut effects);
                self.finish(RequestOutcome::Terminated, &mut effects);
                self.terminate(&mut effects);
            }
            (State::SendingResponse, Event::ChannelInactive) => {
                self.state = State::SendingResponseClientClosed;
            }
            (State::SendingResponse, Event::ChannelException(error)) => {
                tracing::info!(error = %error, request = ?self.ongoing, "Client error while sending response");
                effects.push(Effect::Cancelled(
                    CancelReason::ChannelExceptionWhileSendingResponse,
                ));
                self.cancel_upstream(&mut effects);
                self.finish(RequestOutcome::Terminated, &mut effects);
                self.terminate(&mut effects);
            }

            // SendingResponseClientClosed
            (State::SendingResponseClientClosed, Event::ResponseSent) => {
                self.upstream_live = false;
                let status = self.response_status.unwrap_or(StatusCode::OK);
                self.finish(RequestOutcome::Completed(status), &mut effects);
                self.terminate(&mut effects);
            }
            (State::SendingResponseClientClosed, Event::ResponseWriteFailed(error)) => {
                tracing::debug!(error = %error, "Response write failed after client closed");
                effects.push(Effect::Cancelled(CancelReason::ChannelInactive));
                self.cancel_upstream(&mut effects);
                self.finish(RequestOutcome::Terminated, &mut effects);
                self.terminate(&mut effects);
            }
            (State::SendingResponseClientClosed, Event::ChannelException(error)) => {
                tracing::info!(error = %error, "Client error after client closed");
                effects.push(Effect::Cancelled(CancelReason::ChannelInactive));
                self.cancel_upstream(&mut effects);
                self.finish(RequestOutcome::Terminated, &mut effects);
                self.terminate(&mut effects);
            }

            (state, event) => {
                tracing::warn!(
                    state = ?state,
                    event = event.name(),
                    request = ?self.ongoing.as_ref().map(|info| info.id),
                    "Inappropriate event for state"
                );
            }
        }

        effects
    }

    fn start(&mut self, request: R, effects: &mut Vec<Effect<R, S>>) {
        self.ongoing = Some(request.info().clone());
        self.response_status = None;
        self.upstream_live = true;
        self.finished = false;
        self.state = State::WaitingForResponse;
        effects.push(Effect::InvokeHandler(request));
    }

    fn buffer_premature(&mut self, request: R, effects: &mut Vec<Effect<R, S>>) {
        if self.premature.is_none() {
            tracing::debug!(
                request = ?request.info().id,
                "Request received before the previous response, buffering"
            );
            self.premature = Some(request);
            effects.push(Effect::Cancelled(CancelReason::SpuriousRequest));
        } else {
            tracing::warn!(
                request = ?request.info().id,
                "Spurious request dropped, one is already buffered"
            );
        }
    }

    fn is_current(&self, request_id: RequestId) -> bool {
        self.ongoing.as_ref().is_some_and(|info| info.id == request_id)
    }

    fn stale(&self, event: &'static str, request_id: RequestId) {
        tracing::debug!(event, request_id = %request_id, "Event for a previous request ignored");
    }

    fn respond_with_error(
        &mut self,
        response: ErrorResponse,
        effects: &mut Vec<Effect<R, S>>,
    ) -> StatusCode {
        let status = response.status;
        let request_id = self.ongoing.as_ref().map(|info| info.id);
        self.response_status = Some(status);
        effects.push(Effect::SendErrorResponse(response.with_request_id(request_id)));
        status
    }

    fn cancel_upstream(&mut self, effects: &mut Vec<Effect<R, S>>) {
        if std::mem::take(&mut self.upstream_live) {
            effects.push(Effect::CancelUpstream);
        }
    }

    fn finish(&mut self, outcome: RequestOutcome, effects: &mut Vec<Effect<R, S>>) {
        if self.finished {
            return;
        }
        if let Some(info) = &self.ongoing {
            self.finished = true;
            effects.push(Effect::Finished {
                request_id: info.id,
                outcome,
            });
        }
    }

    fn reset(&mut self) {
        self.state = State::AcceptingRequests;
        self.ongoing = None;
        self.response_status = None;
    }

    fn terminate(&mut self, effects: &mut Vec<Effect<R, S>>) {
        if let Some(request) = self.premature.take() {
            tracing::debug!(request = ?request.info().id, "Buffered request discarded");
        }
        self.state = State::Terminated;
        effects.push(Effect::Close);
    }
}
