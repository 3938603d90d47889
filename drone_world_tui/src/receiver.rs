//! Background receipt of the episode stream.
//!
//! The receiver thread only reassembles frames into complete text messages
//! and forwards them over an mpsc channel; decoding and every state change
//! happen on the UI thread.

use std::{
    io,
    net::TcpStream,
    string::FromUtf8Error,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, error, info, warn};
use tungstenite::{Error as WsError, Message, WebSocket, stream::MaybeTlsStream};

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("could not connect to {url}")]
    Connect {
        url: String,
        #[source]
        source: WsError,
    },
    #[error("stream transport failed")]
    Transport(#[from] WsError),
    #[error("stream socket failed")]
    Io(#[from] io::Error),
    #[error("receiver thread panicked")]
    Panicked,
}

/// A chunk of a message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
    /// Set on the last frame of a message.
    pub end_of_message: bool,
}

/// Result of one read attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Frame(Frame),
    /// Nothing arrived within the read timeout, or only control traffic did.
    Pending,
    /// The peer closed the stream.
    Closed,
}

/// Source of message frames for the receive loop.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<ReadOutcome, ReceiveError>;

    /// Closes the underlying connection; errors are only logged.
    fn close(&mut self);
}

/// Joins frames until the end-of-message marker and yields the text.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: Vec<u8>,
}

impl MessageAssembler {
    pub fn push(&mut self, frame: Frame) -> Option<Result<String, FromUtf8Error>> {
        self.buffer.extend_from_slice(&frame.payload);
        if !frame.end_of_message {
            return None;
        }
        Some(String::from_utf8(std::mem::take(&mut self.buffer)))
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// WebSocket connection to the episode stream.
///
/// tungstenite already joins continuation frames, so each message it
/// returns is forwarded as one final frame.
pub struct WsFrameSource {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl WsFrameSource {
    /// Connects and sets a read timeout so shutdown requests are noticed.
    pub fn connect(url: &str, read_timeout: Duration) -> Result<Self, ReceiveError> {
        let (socket, response) = tungstenite::connect(url).map_err(|source| ReceiveError::Connect {
            url: url.to_string(),
            source,
        })?;
        if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
            stream.set_read_timeout(Some(read_timeout))?;
        }
        info!(url, status = %response.status(), "Connected to episode stream");
        Ok(WsFrameSource { socket })
    }
}

impl FrameSource for WsFrameSource {
    fn next_frame(&mut self) -> Result<ReadOutcome, ReceiveError> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(ReadOutcome::Frame(Frame {
                payload: text.into_bytes(),
                end_of_message: true,
            })),
            Ok(Message::Binary(payload)) => Ok(ReadOutcome::Frame(Frame {
                payload,
                end_of_message: true,
            })),
            Ok(Message::Close(frame)) => {
                debug!(reason = ?frame.as_ref().map(|f| f.reason.to_string()), "Server closed stream");
                Ok(ReadOutcome::Closed)
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => Ok(ReadOutcome::Pending),
            Err(WsError::Io(err))
                if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                Ok(ReadOutcome::Pending)
            }
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(ReadOutcome::Closed),
            Err(err) => Err(err.into()),
        }
    }

    fn close(&mut self) {
        if let Err(err) = self.socket.close(None) {
            debug!(error = %err, "Closing stream socket failed");
        }
        // The peer's reply to the close frame is not awaited.
        if let Err(err) = self.socket.flush() {
            debug!(error = %err, "Flushing close frame failed");
        }
    }
}

/// Handle to the running receiver thread.
pub struct ReceiverHandle {
    shutdown: Arc<AtomicBool>,
    thread: JoinHandle<Result<(), ReceiveError>>,
}

impl ReceiverHandle {
    /// Waits for the thread to end on its own and returns its result.
    pub fn join(self) -> Result<(), ReceiveError> {
        self.thread.join().unwrap_or(Err(ReceiveError::Panicked))
    }

    /// Asks the thread to stop, then waits for it to release the socket.
    pub fn shutdown(self) -> Result<(), ReceiveError> {
        self.shutdown.store(true, Ordering::Release);
        self.join()
    }
}

/// Starts the receive loop on its own thread.
pub fn spawn<S>(mut source: S, tx: mpsc::Sender<String>) -> io::Result<ReceiverHandle>
where
    S: FrameSource + Send + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let thread = thread::Builder::new()
        .name("stream-receiver".to_string())
        .spawn(move || receive_loop(&mut source, &tx, &flag))?;
    Ok(ReceiverHandle { shutdown, thread })
}

fn receive_loop<S: FrameSource>(
    source: &mut S,
    tx: &mpsc::Sender<String>,
    shutdown: &AtomicBool,
) -> Result<(), ReceiveError> {
    let mut assembler = MessageAssembler::default();
    loop {
        if shutdown.load(Ordering::Acquire) {
            info!("Receiver shutting down");
            source.close();
            return Ok(());
        }

        match source.next_frame() {
            Ok(ReadOutcome::Frame(frame)) => match assembler.push(frame) {
                Some(Ok(text)) => {
                    if tx.send(text).is_err() {
                        debug!("Message consumer dropped; stopping receiver");
                        source.close();
                        return Ok(());
                    }
                }
                Some(Err(err)) => warn!(error = %err, "Discarding message that is not valid UTF-8"),
                None => {}
            },
            Ok(ReadOutcome::Pending) => {}
            Ok(ReadOutcome::Closed) => {
                info!(partial = assembler.buffered(), "Episode stream closed by server");
                return Ok(());
            }
            Err(err) => {
                error!(error = %err, "Episode stream failed");
                source.close();
                return Err(err);
            }
        }
    }
}
