//! Per-operation read and write deadlines for upstream connections.
//!
//! A deadline is armed when a read (or write) first returns `Pending` and is
//! cleared as soon as the operation completes. Every operation gets the full
//! timeout, measured from the moment it blocked. Only TCP connections are
//! wrapped.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Sleep};

/// Wraps a stream and fails blocked reads/writes with `TimedOut`.
#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    read_deadline: Option<Pin<Box<Sleep>>>,
    write_deadline: Option<Pin<Box<Sleep>>>,
}

impl<S> TimeoutStream<S> {
    /// Zero durations disable the corresponding deadline.
    pub fn new(inner: S, read_timeout: Duration, write_timeout: Duration) -> Self {
        let non_zero = |d: Duration| (!d.is_zero()).then_some(d);
        Self {
            inner,
            read_timeout: non_zero(read_timeout),
            write_timeout: non_zero(write_timeout),
            read_deadline: None,
            write_deadline: None,
        }
    }

}

fn poll_deadline(
    deadline: &mut Option<Pin<Box<Sleep>>>,
    timeout: Option<Duration>,
    cx: &mut Context<'_>,
    op: &'static str,
) -> Poll<io::Result<()>> {
    let Some(timeout) = timeout else {
        return Poll::Pending;
    };
    let timer = deadline.get_or_insert_with(|| Box::pin(sleep(timeout)));
    match timer.as_mut().poll(cx) {
        Poll::Ready(()) => {
            *deadline = None;
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("upstream {} timed out after {:?}", op, timeout),
            )))
        }
        Poll::Pending => Poll::Pending,
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TimeoutStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.read_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(&mut this.read_deadline, this.read_timeout, cx, "read"),
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TimeoutStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(&mut this.write_deadline, this.write_timeout, cx, "write")
                .map(|r| r.map(|()| 0)),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(&mut this.write_deadline, this.write_timeout, cx, "write"),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write_vectored(cx, bufs) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(&mut this.write_deadline, this.write_timeout, cx, "write")
                .map(|r| r.map(|()| 0)),
        }
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
