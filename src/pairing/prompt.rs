//! PIN collection
//!
//! The orchestrator hands control to a `PinPrompt` whenever a device is
//! showing a PIN. Implementations decide how the user is asked; the answer
//! is either a PIN or a cancellation.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::pairing::machine::Protocol;

/// What the user answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinInput {
    Pin(String),
    Cancelled,
}

impl PinInput {
    /// Interpret free text: blank text or `skip` cancels.
    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() || text.eq_ignore_ascii_case("skip") {
            PinInput::Cancelled
        } else {
            PinInput::Pin(text.to_string())
        }
    }
}

/// Source of PINs during pairing.
#[async_trait]
pub trait PinPrompt: Send + Sync {
    /// Ask for the PIN shown on the device for `protocol`.
    async fn prompt(&self, protocol: Protocol) -> PinInput;
}

/// Prompts on a writer and reads one line per PIN from a reader.
///
/// End of input counts as a cancellation.
pub struct LinePinPrompt<R, W> {
    io: Mutex<(R, W)>,
}

impl<R, W> LinePinPrompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

#[async_trait]
impl<R, W> PinPrompt for LinePinPrompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn prompt(&self, protocol: Protocol) -> PinInput {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;

        let question = format!("Enter the {} PIN shown on the TV (blank to skip): ", protocol.label());
        if let Err(e) = writer.write_all(question.as_bytes()).await {
            log::warn!("PIN prompt write failed: {}", e);
        }
        let _ = writer.flush().await;

        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => PinInput::Cancelled,
            Ok(_) => PinInput::from_text(&line),
            Err(e) => {
                log::warn!("PIN prompt read failed: {}", e);
                PinInput::Cancelled
            }
        }
    }
}
