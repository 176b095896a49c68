//! Transport abstraction for the session layer

use async_trait::async_trait;
use secs_core::SecsResult;
use tokio::io::{AsyncRead, AsyncWrite};

/// A connected byte stream the session layer can run HSMS over
///
/// Implemented for every `AsyncRead + AsyncWrite` stream, so TCP streams and
/// in-memory duplex pipes are interchangeable.
pub trait HsmsStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> HsmsStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Transport layer able to open a connected stream
#[async_trait]
pub trait TransportLayer: Send + Sync {
    type Stream: HsmsStream;

    /// Open the physical layer connection
    async fn open(&self) -> SecsResult<Self::Stream>;

    /// Human-readable remote endpoint, used in log output
    fn endpoint(&self) -> String;
}
