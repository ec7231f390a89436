// TCP client for connecting to the session server.
//
// Provides a non-blocking interface for a caller's main thread:
// - `connect()` performs TCP connect + Hello handshake on the calling
//   thread, then spawns a background reader thread.
// - The reader thread calls `read_message()` in a loop, deserializes
//   `ServerMessage`, and pushes into an `mpsc` channel.
// - The caller holds a `BufWriter<TcpStream>` for sending.
// - `poll()` drains the inbox non-blocking; `recv_timeout()` blocks up to
//   a deadline (integration tests want to wait for a specific message).
//
// This is the client used by the bundled robot player (`robot.rs`) and by
// the integration tests; human client programs would build on the same
// type.

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use quarry_protocol::framing::{read_message, write_message};
use quarry_protocol::message::{ClientMessage, ServerMessage};

/// TCP client for session-server communication.
#[derive(Debug)]
pub struct NetClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ServerMessage>,
    _reader_thread: Option<JoinHandle<()>>,
    /// The display name granted by the handshake.
    pub name: String,
}

impl NetClient {
    /// Connect, perform the Hello handshake, and spawn a reader thread.
    /// Returns the client on `Welcome`; a `Rejected` handshake is an error.
    pub fn connect(
        addr: &str,
        name: &str,
        password: Option<String>,
        protocol_version: u32,
        is_robot: bool,
    ) -> Result<Self, String> {
        let stream = TcpStream::connect(addr).map_err(|e| format!("connect failed: {e}"))?;

        // Bounded handshake; cleared before the long-lived reader loop.
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .ok();

        let reader_stream = stream
            .try_clone()
            .map_err(|e| format!("clone failed: {e}"))?;
        let mut writer = BufWriter::new(stream);

        let hello = ClientMessage::Hello {
            protocol_version,
            name: name.into(),
            password,
            is_robot,
        };
        send_msg(&mut writer, &hello).map_err(|e| format!("send Hello failed: {e}"))?;

        let mut reader = BufReader::new(reader_stream);
        let response_bytes =
            read_message(&mut reader).map_err(|e| format!("read Welcome failed: {e}"))?;
        let response: ServerMessage = serde_json::from_slice(&response_bytes)
            .map_err(|e| format!("parse Welcome failed: {e}"))?;

        let granted = match response {
            ServerMessage::Welcome { name } => name,
            ServerMessage::Rejected { reason } => {
                return Err(format!("rejected: {reason}"));
            }
            other => {
                return Err(format!("unexpected response: {other:?}"));
            }
        };

        if let Ok(inner) = reader.get_ref().try_clone() {
            inner.set_read_timeout(None).ok();
        }

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || {
            reader_loop(reader, tx);
        });

        Ok(Self {
            writer,
            inbox: rx,
            _reader_thread: Some(reader_thread),
            name: granted,
        })
    }

    /// Send one message to the server.
    pub fn send(&mut self, msg: &ClientMessage) -> Result<(), String> {
        send_msg(&mut self.writer, msg)
    }

    /// Drain all queued server messages (non-blocking).
    pub fn poll(&self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.inbox.try_recv() {
            messages.push(msg);
        }
        messages
    }

    /// Block up to `timeout` for the next server message. The error
    /// distinguishes a quiet server from a dead connection.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ServerMessage, mpsc::RecvTimeoutError> {
        self.inbox.recv_timeout(timeout)
    }

    /// Send Goodbye; the server tears the connection down.
    pub fn disconnect(&mut self) {
        let _ = send_msg(&mut self.writer, &ClientMessage::Goodbye);
    }
}

/// Serialize a `ClientMessage` to JSON and write with length framing.
fn send_msg(writer: &mut BufWriter<TcpStream>, msg: &ClientMessage) -> Result<(), String> {
    let json = serde_json::to_vec(msg).map_err(|e| e.to_string())?;
    write_message(writer, &json).map_err(|e| e.to_string())
}

/// Reader thread: read framed messages in a loop, push to channel.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<ServerMessage>) {
    while let Ok(bytes) = read_message(&mut reader) {
        match serde_json::from_slice::<ServerMessage>(&bytes) {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    break; // Receiver dropped
                }
            }
            Err(_) => break, // Malformed message
        }
    }
}
