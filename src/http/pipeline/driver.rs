//! Executes pipeline effects for one connection.
//!
//! # Responsibilities
//! - Feed connection and handler events into the session one at a time
//! - Run handlers on their own tasks and report their outcome as events
//! - Stream response bodies one chunk at a time, reporting the response sent
//!   only after the client body has ended
//! - Cancel handler and body tasks, and report completion to the progress
//!   listener
//!
//! # Design Decisions
//! - A single unbounded queue per connection; redelivered requests jump it
//! - A handler panic is reported as "completed without response" (500)
//! - Cancelling a response makes the client body fail rather than end, so a
//!   truncated response is never mistaken for a complete one

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, response, HeaderName, Method, Request, Response, StatusCode};
use futures_util::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::AbortHandle;

use crate::error::{ProxyError, ProxyResult};
use crate::http::handler::HttpHandler;
use crate::http::headers::HeaderNames;
use crate::http::pipeline::state::{
    Effect, Event, PipelineRequest, RequestOutcome, Session, State,
};
use crate::http::request::{RequestId, RequestInfo};
use crate::observability::metrics;

/// A request together with the slot its response goes into.
pub struct InboundRequest {
    request: Request<Body>,
    info: RequestInfo,
    responder: oneshot::Sender<Response<Body>>,
}

impl InboundRequest {
    /// Wrap a client request, settling its request id and stamping it on the request.
    pub fn new(
        mut request: Request<Body>,
        request_id_header: &HeaderName,
    ) -> (Self, oneshot::Receiver<Response<Body>>) {
        let info = RequestInfo::from_request(&request, request_id_header);
        request
            .headers_mut()
            .insert(request_id_header.clone(), info.id.header_value());
        request.extensions_mut().insert(info.clone());

        let (responder, response_rx) = oneshot::channel();
        (
            Self {
                request,
                info,
                responder,
            },
            response_rx,
        )
    }
}

impl PipelineRequest for InboundRequest {
    fn info(&self) -> &RequestInfo {
        &self.info
    }
}

pub type PipelineEvent = Event<InboundRequest, Response<Body>>;
type PipelineEffect = Effect<InboundRequest, Response<Body>>;

/// Observer of request lifecycles; each accepted request gets `on_request`
/// followed by exactly one of `on_complete` or `on_terminate`.
pub trait RequestProgressListener: Send + Sync {
    fn on_request(&self, request: &RequestInfo);
    fn on_complete(&self, request_id: RequestId, status: StatusCode);
    fn on_terminate(&self, request_id: RequestId);
}

/// Records request counters and the outstanding-requests gauge.
#[derive(Debug, Default)]
pub struct MetricsProgressListener;

impl RequestProgressListener for MetricsProgressListener {
    fn on_request(&self, _request: &RequestInfo) {
        metrics::request_started();
    }

    fn on_complete(&self, _request_id: RequestId, status: StatusCode) {
        metrics::request_completed(Some(status));
    }

    fn on_terminate(&self, request_id: RequestId) {
        tracing::debug!(request_id = %request_id, "Request terminated without a response");
        metrics::request_completed(None);
    }
}

/// The connection's side of the pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    events: mpsc::UnboundedSender<PipelineEvent>,
    state: watch::Receiver<State>,
    request_id_header: HeaderName,
}

impl PipelineHandle {
    /// Submit a request and wait for the response the pipeline settles on.
    pub async fn dispatch(&self, request: Request<Body>) -> ProxyResult<Response<Body>> {
        let (inbound, response_rx) = InboundRequest::new(request, &self.request_id_header);
        self.events
            .send(Event::RequestReceived(inbound))
            .map_err(|_| ProxyError::Internal("pipeline stopped".into()))?;
        response_rx
            .await
            .map_err(|_| ProxyError::Internal("request ended without a response".into()))
    }

    pub fn notify(&self, event: PipelineEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Pipeline already stopped");
        }
    }

    /// Follows the session state as events are applied.
    pub fn state(&self) -> watch::Receiver<State> {
        self.state.clone()
    }
}

/// Fired once the pipeline wants the connection closed. Carries the response
/// to write on the raw connection when no request was there to take it.
pub type CloseSignal = oneshot::Receiver<Option<Response<Body>>>;

pub struct PipelineDriver<H> {
    handler: Arc<H>,
    headers: HeaderNames,
    listener: Arc<dyn RequestProgressListener>,
    session: Session<InboundRequest, Response<Body>>,
    events_tx: mpsc::UnboundedSender<PipelineEvent>,
    events_rx: mpsc::UnboundedReceiver<PipelineEvent>,
    redelivered: VecDeque<PipelineEvent>,
    responder: Option<oneshot::Sender<Response<Body>>>,
    handler_task: Option<AbortHandle>,
    body_task: Option<(AbortHandle, Arc<Notify>)>,
    state_tx: watch::Sender<State>,
    rejection: Option<Response<Body>>,
    close_tx: Option<oneshot::Sender<Option<Response<Body>>>>,
}

impl<H: HttpHandler> PipelineDriver<H> {
    /// Returns the driver, the handle for the connection and a signal that
    /// fires when the pipeline wants the connection closed.
    pub fn new(
        handler: Arc<H>,
        headers: HeaderNames,
        listener: Arc<dyn RequestProgressListener>,
    ) -> (Self, PipelineHandle, CloseSignal) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(State::AcceptingRequests);
        let handle = PipelineHandle {
            events: events_tx.clone(),
            state: state_rx,
            request_id_header: headers.request_id.clone(),
        };
        let driver = Self {
            handler,
            headers,
            listener,
            session: Session::new(),
            events_tx,
            events_rx,
            redelivered: VecDeque::new(),
            responder: None,
            handler_task: None,
            body_task: None,
            state_tx,
            rejection: None,
            close_tx: Some(close_tx),
        };
        (driver, handle, close_rx)
    }

    /// Process events until the session terminates.
    pub async fn run(mut self) {
        while !self.session.is_terminated() {
            let event = match self.redelivered.pop_front() {
                Some(event) => event,
                None => match self.events_rx.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };

            for effect in self.session.on_event(event) {
                self.execute(effect);
            }
            let state = self.session.state();
            self.state_tx.send_if_modified(|current| {
                let changed = *current != state;
                *current = state;
                changed
            });
        }
        self.release();
    }

    fn execute(&mut self, effect: PipelineEffect) {
        match effect {
            Effect::InvokeHandler(inbound) => self.invoke_handler(inbound),
            Effect::SendResponse(response) => self.send_response(response),
            Effect::SendErrorResponse(error) => {
                let response = error.into_response(&self.headers);
                match self.responder.take() {
                    Some(responder) => {
                        if responder.send(response).is_err() {
                            tracing::debug!("Client gone before error response could be sent");
                        }
                    }
                    // Between requests the connection writes it on the raw socket
                    None => self.rejection = Some(response),
                }
            }
            Effect::CancelUpstream => self.cancel_upstream(),
            Effect::Redeliver(inbound) => {
                self.redelivered.push_front(Event::RequestReceived(inbound));
            }
            Effect::Cancelled(reason) => metrics::record_cancellation(reason.as_str()),
            Effect::Finished {
                request_id,
                outcome,
            } => {
                self.responder = None;
                self.handler_task = None;
                self.body_task = None;
                match outcome {
                    RequestOutcome::Completed(status) => {
                        self.listener.on_complete(request_id, status)
                    }
                    RequestOutcome::Terminated => self.listener.on_terminate(request_id),
                }
            }
            Effect::Close => self.close(),
        }
    }

    fn invoke_handler(&mut self, inbound: InboundRequest) {
        let InboundRequest {
            request,
            info,
            responder,
        } = inbound;
        self.listener.on_request(&info);
        self.responder = Some(responder);

        tracing::debug!(
            request_id = %info.id,
            method = %info.method,
            uri = %info.uri,
            "Dispatching request"
        );

        let request_id = info.id;
        let events = self.events_tx.clone();
        let handling = self.handler.handle(request);
        let task = tokio::spawn(async move {
            let event = match AssertUnwindSafe(handling).catch_unwind().await {
                Ok(Ok(response)) => Event::HandlerResponse {
                    request_id,
                    response,
                },
                Ok(Err(error)) => Event::HandlerFailed { request_id, error },
                Err(_) => {
                    tracing::error!(request_id = %request_id, "Handler panicked");
                    Event::HandlerCompleted { request_id }
                }
            };
            let _ = events.send(event);
        });
        self.handler_task = Some(task.abort_handle());
    }

    fn send_response(&mut self, response: Response<Body>) {
        let Some(responder) = self.responder.take() else {
            tracing::warn!("Response produced with no request waiting for it");
            return;
        };

        let (mut parts, upstream) = response.into_parts();
        let info = self.session.current_request();
        if let Some(info) = info {
            parts
                .headers
                .insert(self.headers.request_id.clone(), info.id.header_value());
        }
        let length = declared_length(info.map(|info| &info.method), &parts);

        let (chunk_tx, chunk_rx) = mpsc::channel(1);
        let (ended_tx, ended_rx) = oneshot::channel();
        let abort = Arc::new(Notify::new());
        let body = client_body(chunk_rx, Arc::clone(&abort), ended_tx, length);

        if responder.send(Response::from_parts(parts, body)).is_err() {
            self.notify(Event::ResponseWriteFailed(ProxyError::ConsumerDisconnected));
            return;
        }

        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            let event = pump_body(upstream, chunk_tx, ended_rx).await;
            let _ = events.send(event);
        });
        self.body_task = Some((task.abort_handle(), abort));
    }

    fn cancel_upstream(&mut self) {
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        if let Some((task, abort)) = self.body_task.take() {
            abort.notify_one();
            task.abort();
        }
    }

    fn notify(&self, event: PipelineEvent) {
        let _ = self.events_tx.send(event);
    }

    fn close(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(self.rejection.take());
        }
    }

    fn release(&mut self) {
        self.cancel_upstream();
        self.responder = None;
        self.redelivered.clear();
        self.close();
    }
}

/// One chunk on its way to the client, with the signal that it was written.
struct Chunk {
    data: Result<Bytes, ProxyError>,
    written: oneshot::Sender<()>,
}

/// Copy the upstream body to the client, pulling the next chunk only once the
/// previous one has been written.
async fn pump_body(
    upstream: Body,
    chunk_tx: mpsc::Sender<Chunk>,
    ended: oneshot::Receiver<()>,
) -> PipelineEvent {
    let mut data = upstream.into_data_stream();
    loop {
        match data.next().await {
            Some(Ok(bytes)) => {
                let (written, written_rx) = oneshot::channel();
                let chunk = Chunk {
                    data: Ok(bytes),
                    written,
                };
                if chunk_tx.send(chunk).await.is_err() || written_rx.await.is_err() {
                    return Event::ResponseWriteFailed(ProxyError::ConsumerDisconnected);
                }
            }
            Some(Err(error)) => {
                let (written, _) = oneshot::channel();
                let _ = chunk_tx
                    .send(Chunk {
                        data: Err(ProxyError::Internal("upstream body failed".into())),
                        written,
                    })
                    .await;
                return Event::ResponseWriteFailed(ProxyError::handler("response body", error));
            }
            None => break,
        }
    }

    drop(chunk_tx);
    match ended.await {
        Ok(()) => Event::ResponseSent,
        Err(_) => Event::ResponseWriteFailed(ProxyError::ConsumerDisconnected),
    }
}

struct ClientBodyState {
    chunks: mpsc::Receiver<Chunk>,
    abort: Arc<Notify>,
    /// Acknowledges the chunk yielded last; fired when the next frame is polled.
    last_written: Option<oneshot::Sender<()>>,
    ended: Option<oneshot::Sender<()>>,
    /// Bytes still owed when the codec knows the body length up front.
    remaining: Option<u64>,
    done: bool,
}

impl Drop for ClientBodyState {
    fn drop(&mut self) {
        // The codec stops polling once a declared length has been taken
        if !self.done && self.remaining == Some(0) {
            if let Some(written) = self.last_written.take() {
                let _ = written.send(());
            }
            if let Some(ended) = self.ended.take() {
                let _ = ended.send(());
            }
        }
    }
}

/// Client-facing body: yields pumped chunks, fails when cancelled.
fn client_body(
    chunks: mpsc::Receiver<Chunk>,
    abort: Arc<Notify>,
    ended: oneshot::Sender<()>,
    length: Option<u64>,
) -> Body {
    let state = ClientBodyState {
        chunks,
        abort,
        last_written: None,
        ended: Some(ended),
        remaining: length,
        done: false,
    };
    let stream = futures_util::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        // The codec asks for the next frame only after taking the previous one
        if let Some(written) = state.last_written.take() {
            let _ = written.send(());
        }
        tokio::select! {
            biased;
            _ = state.abort.notified() => {
                state.done = true;
                Some((Err(ProxyError::Internal("response cancelled".into())), state))
            }
            chunk = state.chunks.recv() => match chunk {
                Some(Chunk { data, written }) => {
                    match &data {
                        Ok(bytes) => {
                            state.remaining = state
                                .remaining
                                .map(|left| left.saturating_sub(bytes.len() as u64));
                        }
                        Err(_) => state.done = true,
                    }
                    state.last_written = Some(written);
                    Some((data, state))
                }
                None => {
                    if let Some(ended) = state.ended.take() {
                        let _ = ended.send(());
                    }
                    None
                }
            },
        }
    });
    Body::from_stream(stream)
}

/// Body bytes the codec will take before it stops polling, when known in advance.
fn declared_length(method: Option<&Method>, parts: &response::Parts) -> Option<u64> {
    let bodiless = method == Some(&Method::HEAD)
        || parts.status.is_informational()
        || parts.status == StatusCode::NO_CONTENT
        || parts.status == StatusCode::NOT_MODIFIED;
    if bodiless {
        return Some(0);
    }
    parts
        .headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
