//! Client core: connection, handshake, and the cooperating tasks.
//!
//! The socket is split once and never shared: a receiver task owns the
//! read half, a writer task owns the write half, and the REPL input
//! loop talks to the writer only through an `mpsc` channel.

use std::net::SocketAddr;
use std::time::Duration;

use colored::Colorize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use jimchat_protocol::codec::MAX_FRAME_LEN;
use jimchat_protocol::{Frame, Request, WireCodec};
use jimchat_types::config::ClientConfig;
use jimchat_types::{JimError, Result};

use crate::input::{parse_input, InputCommand};

// ---------------------------------------------------------------------------
// Frame reader
// ---------------------------------------------------------------------------

/// Splits the receive stream back into individual JSON documents.
///
/// The protocol has no framing, so a server that writes a response and
/// a delivered message back-to-back may land both in one read. The
/// buffer is scanned for complete documents and handed out one at a
/// time.
struct FrameReader {
    reader: OwnedReadHalf,
    buf: Vec<u8>,
}

impl FrameReader {
    fn new(reader: OwnedReadHalf) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Returns the raw bytes of the next complete JSON document.
    ///
    /// # Errors
    ///
    /// - [`JimError::PeerClosed`] on a zero-byte read.
    /// - [`JimError::TransportError`] on a socket error.
    /// - [`JimError::MalformedPayload`] if the buffer holds bytes that
    ///   can never become a valid document (the buffer is discarded).
    async fn next_frame(&mut self) -> Result<Vec<u8>> {
        loop {
            if !self.buf.is_empty() {
                let mut frames =
                    serde_json::Deserializer::from_slice(&self.buf).into_iter::<serde_json::Value>();
                match frames.next() {
                    Some(Ok(_)) => {
                        let consumed = frames.byte_offset();
                        let frame: Vec<u8> = self.buf.drain(..consumed).collect();
                        return Ok(frame);
                    }
                    Some(Err(e)) if e.is_eof() => {}
                    Some(Err(e)) => {
                        self.buf.clear();
                        return Err(JimError::MalformedPayload {
                            reason: format!("unparseable bytes from server: {e}"),
                        });
                    }
                    None => {}
                }
            }

            let mut chunk = [0u8; MAX_FRAME_LEN];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(JimError::PeerClosed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Dials the server, retrying with a fixed backoff while it refuses
/// connections. There is no upper bound on attempts.
async fn connect_with_retry(config: &ClientConfig) -> Result<TcpStream> {
    let addr = SocketAddr::new(config.server_addr, config.port);

    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::info!(%addr, "connected");
                return Ok(stream);
            }
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                tracing::info!(%addr, "server not ready, retrying...");
                tokio::time::sleep(Duration::from_secs(config.reconnect_delay_secs)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Sends the identify action and waits for the server's verdict.
async fn handshake(
    config: &ClientConfig,
    codec: &WireCodec,
    writer: &mut OwnedWriteHalf,
    frames: &mut FrameReader,
) -> Result<()> {
    let identify = match &config.password {
        Some(password) => Request::authenticate(&config.username, password),
        None => Request::presence(&config.username, &config.status),
    };

    let raw = codec.encode(&identify)?;
    writer.write_all(&raw).await?;

    let reply = frames.next_frame().await?;
    let value = codec.decode(&reply)?;

    match Frame::from_value(value)? {
        Frame::Response(response) if !response.is_error() => {
            tracing::info!(username = %config.username, "session established");
            Ok(())
        }
        Frame::Response(response) => Err(JimError::SessionRejected {
            code: response.response,
            reason: response.text().to_string(),
        }),
        Frame::Request(_) => Err(JimError::MalformedPayload {
            reason: "expected a response to the identify action".into(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Receiver task: prints delivered chat messages, logs everything
/// else. Runs until the server goes away.
async fn run_receiver(mut frames: FrameReader, codec: WireCodec) {
    loop {
        let raw = match frames.next_frame().await {
            Ok(raw) => raw,
            Err(JimError::PeerClosed) => {
                eprintln!("{}", "connection closed by server".red());
                break;
            }
            Err(JimError::MalformedPayload { reason }) => {
                tracing::warn!(%reason, "dropping undecodable bytes");
                continue;
            }
            Err(e) => {
                tracing::error!(%e, "receive failed");
                break;
            }
        };

        match codec.decode(&raw).and_then(Frame::from_value) {
            Ok(Frame::Request(Request::Msg(chat))) => {
                println!("{} {}", format!("{} >", chat.from).green().bold(), chat.message);
            }
            Ok(Frame::Request(Request::Probe { .. })) => {
                tracing::debug!("probe from server");
            }
            Ok(Frame::Request(other)) => {
                tracing::debug!(?other, "unexpected request from server");
            }
            Ok(Frame::Response(response)) if response.is_error() => {
                eprintln!(
                    "{} {} {}",
                    "server error:".red(),
                    response.response,
                    response.text()
                );
            }
            Ok(Frame::Response(response)) => {
                tracing::debug!(code = response.response, "server response");
            }
            Err(e) => tracing::warn!(%e, "undecodable frame from server"),
        }
    }
}

/// Writer task: the only owner of the write half. Requests arrive over
/// the channel from the input loop.
async fn run_writer(
    mut writer: OwnedWriteHalf,
    codec: WireCodec,
    mut outbound: mpsc::Receiver<Request>,
) {
    while let Some(request) = outbound.recv().await {
        let raw = match codec.encode(&request) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(%e, "failed to encode outbound message");
                continue;
            }
        };

        if let Err(e) = writer.write_all(&raw).await {
            tracing::error!(%e, "send failed");
            break;
        }
    }

    let _ = writer.shutdown().await;
}

// ---------------------------------------------------------------------------
// REPL
// ---------------------------------------------------------------------------

fn print_help() {
    println!(
        "Commands: {} {} {}",
        "/to <user>".bold(),
        "/quit".bold(),
        "/help".bold(),
    );
}

/// Runs the client until `/quit`, Ctrl+C, or stdin EOF.
pub async fn run(config: ClientConfig) -> Result<()> {
    let codec = WireCodec::new();

    let stream = connect_with_retry(&config).await?;
    let (read_half, mut write_half) = stream.into_split();

    let mut frames = FrameReader::new(read_half);
    handshake(&config, &codec, &mut write_half, &mut frames).await?;

    let (outbound_tx, outbound_rx) = mpsc::channel::<Request>(16);
    let receiver = tokio::spawn(run_receiver(frames, codec.clone()));
    let writer = tokio::spawn(run_writer(write_half, codec.clone(), outbound_rx));

    println!(
        "connected as {} (type {} for commands)",
        config.username.green().bold(),
        "/help".bold(),
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut recipient: Option<String> = None;

    loop {
        let line = tokio::select! {
            read = lines.next_line() => match read {
                Ok(Some(line)) => line,
                Ok(None) => break, // stdin EOF
                Err(e) => {
                    tracing::error!(%e, "failed to read input");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        match parse_input(&line) {
            InputCommand::Empty => {}
            InputCommand::Help => print_help(),
            InputCommand::To(name) => {
                println!("messages now go to {}", name.green());
                recipient = Some(name);
            }
            InputCommand::Quit => {
                let _ = outbound_tx.send(Request::quit()).await;
                break;
            }
            InputCommand::Text(text) => match &recipient {
                Some(to) => {
                    let request = Request::msg(&config.username, to, &text);
                    if outbound_tx.send(request).await.is_err() {
                        tracing::error!("writer task is gone");
                        break;
                    }
                }
                None => {
                    eprintln!("no recipient selected; use {}", "/to <user>".bold());
                }
            },
        }
    }

    // Dropping the sender lets the writer task drain and shut the
    // socket down; the receiver ends when the server closes our read
    // half in response.
    drop(outbound_tx);
    let _ = writer.await;
    receiver.abort();

    tracing::info!("client exiting");
    Ok(())
}
