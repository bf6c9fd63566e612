//! Client socket adapter that polices request heads ahead of the codec.
//!
//! # Responsibilities
//! - Bound the request line, the header block and the header count of each request
//! - Time out clients that start a request head but never finish it, and
//!   close keep-alive connections that stay idle for as long
//! - Report violations to the pipeline and withhold the offending bytes from
//!   the codec, so the pipeline's error response is the one the client gets
//!
//! # Design Decisions
//! - A head is watched only while the session accepts requests; bytes read
//!   during a response (request bodies, pipelined requests) are not counted
//! - The socket is shared with the connection task so a rejection can still be
//!   written after the codec has been dropped

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Sleep;

use crate::config::ListenerConfig;
use crate::error::{BadRequestKind, ProxyError};
use crate::http::pipeline::{Event, PipelineHandle, State};

/// Limits on one request head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadLimits {
    pub max_initial_line: usize,
    pub max_head_bytes: usize,
    pub max_headers: usize,
    pub read_timeout: Duration,
}

impl HeadLimits {
    pub fn from_config(listener: &ListenerConfig, read_timeout: Duration) -> Self {
        Self {
            max_initial_line: listener.max_initial_line_bytes,
            max_head_bytes: listener.max_header_bytes,
            max_headers: listener.max_headers,
            read_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeadStatus {
    Partial,
    Complete,
    TooLarge,
}

/// Progress through one request head.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct HeadScan {
    bytes: usize,
    /// Lines finished so far, the request line included.
    lines: usize,
    line_len: usize,
    complete: bool,
}

impl HeadScan {
    pub(crate) fn feed(&mut self, data: &[u8], limits: &HeadLimits) -> HeadStatus {
        if self.complete {
            return HeadStatus::Complete;
        }
        for &byte in data {
            self.bytes += 1;
            match byte {
                b'\n' if self.line_len == 0 && self.lines > 0 => {
                    self.complete = true;
                    return HeadStatus::Complete;
                }
                // Blank lines ahead of the request line are tolerated
                b'\n' if self.line_len == 0 => {}
                b'\n' => {
                    self.lines += 1;
                    self.line_len = 0;
                }
                b'\r' => {}
                _ => self.line_len += 1,
            }

            let too_large = self.bytes > limits.max_head_bytes
                || (self.lines == 0 && self.line_len > limits.max_initial_line)
                || self.lines.saturating_sub(1) > limits.max_headers;
            if too_large {
                return HeadStatus::TooLarge;
            }
        }
        HeadStatus::Partial
    }

    fn started(&self) -> bool {
        self.bytes > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    /// A violation was reported; the codec gets no more bytes.
    Rejected,
    /// The connection sat idle too long; the codec sees end of stream.
    Idle,
}

/// The client connection as the HTTP codec sees it.
pub struct ClientIo {
    stream: Arc<TcpStream>,
    pipeline: PipelineHandle,
    state: watch::Receiver<State>,
    limits: HeadLimits,
    head: Option<HeadScan>,
    deadline: Option<Pin<Box<Sleep>>>,
    halted: Option<Halt>,
}

impl ClientIo {
    pub fn new(stream: Arc<TcpStream>, pipeline: PipelineHandle, limits: HeadLimits) -> Self {
        let mut state = pipeline.state();
        let accepting = *state.borrow_and_update() == State::AcceptingRequests;
        let mut io = Self {
            stream,
            pipeline,
            state,
            limits,
            head: None,
            deadline: None,
            halted: None,
        };
        if accepting {
            io.open_head();
        }
        io
    }

    fn open_head(&mut self) {
        self.head = Some(HeadScan::default());
        self.deadline = Some(Box::pin(tokio::time::sleep(self.limits.read_timeout)));
    }

    /// Start or stop watching for a head as the session changes state.
    fn follow_session(&mut self) {
        if !self.state.has_changed().unwrap_or(false) {
            return;
        }
        if *self.state.borrow_and_update() == State::AcceptingRequests {
            self.open_head();
        } else {
            self.head = None;
            self.deadline = None;
        }
    }

    fn halt(&mut self, halt: Halt) {
        self.halted = Some(halt);
        self.head = None;
        self.deadline = None;
    }

    fn reject(&mut self, error: ProxyError) {
        self.halt(Halt::Rejected);
        self.pipeline.notify(Event::ChannelException(error));
    }

    /// Nothing to read yet: enforce the head deadline.
    fn poll_deadline(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let Some(deadline) = self.deadline.as_mut() else {
            return Poll::Pending;
        };
        if deadline.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }

        if self.head.as_ref().is_some_and(HeadScan::started) {
            tracing::debug!(
                timeout_secs = self.limits.read_timeout.as_secs(),
                "Request head not completed in time"
            );
            self.reject(ProxyError::RequestTimeout);
            Poll::Pending
        } else {
            tracing::debug!("Closing idle client connection");
            self.halt(Halt::Idle);
            Poll::Ready(Ok(()))
        }
    }
}

impl AsyncRead for ClientIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.halted {
            Some(Halt::Rejected) => return Poll::Pending,
            Some(Halt::Idle) => return Poll::Ready(Ok(())),
            None => {}
        }
        this.follow_session();

        let before = buf.filled().len();
        loop {
            if this.stream.poll_read_ready(cx)?.is_pending() {
                return this.poll_deadline(cx);
            }
            match this.stream.try_read(buf.initialize_unfilled()) {
                Ok(n) => {
                    buf.advance(n);
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }

        let status = match this.head.as_mut() {
            Some(head) => head.feed(&buf.filled()[before..], &this.limits),
            None => return Poll::Ready(Ok(())),
        };
        match status {
            HeadStatus::Partial => {}
            HeadStatus::Complete => this.deadline = None,
            HeadStatus::TooLarge => {
                buf.set_filled(before);
                tracing::debug!(
                    max_head_bytes = this.limits.max_head_bytes,
                    max_headers = this.limits.max_headers,
                    "Request head over limits"
                );
                this.reject(ProxyError::BadRequest {
                    kind: BadRequestKind::HeadersTooLarge,
                    source: None,
                });
                return Poll::Pending;
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ClientIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            ready!(self.stream.poll_write_ready(cx))?;
            match self.stream.try_write(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                result => return Poll::Ready(result),
            }
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        loop {
            ready!(self.stream.poll_write_ready(cx))?;
            match self.stream.try_write_vectored(bufs) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                result => return Poll::Ready(result),
            }
        }
    }

    fn is_write_vectored(&self) -> bool {
        true
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    // The socket closes when the connection task drops its last handle.
    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
