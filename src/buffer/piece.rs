//! Per-channel piece extraction.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::DelimiterBuffer;

/// Output channel of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turns the raw fragments of one channel into complete pieces.
///
/// Every byte fed in ends up either in a returned piece or in the pending
/// tail, never both and never twice. Independently of segmentation, the
/// stream also keeps everything it was fed as a transcript.
#[derive(Debug, Clone)]
pub struct PieceStream {
    channel: Channel,
    buffer: DelimiterBuffer,
    transcript: String,
    /// Leading bytes of a UTF-8 sequence whose remainder has not arrived yet.
    partial: Vec<u8>,
}

impl PieceStream {
    /// Create a stream for `channel` that splits on `delimiter`.
    ///
    /// An empty delimiter disables segmentation: nothing is ever emitted and
    /// all content accumulates as the pending tail.
    #[must_use]
    pub fn new(channel: Channel, delimiter: &str) -> Self {
        Self {
            channel,
            buffer: DelimiterBuffer::with_delimiter(delimiter),
            transcript: String::new(),
            partial: Vec::new(),
        }
    }

    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Feed a text fragment, returning the pieces it completed in order.
    pub fn feed(&mut self, fragment: &str) -> Vec<String> {
        self.transcript.push_str(fragment);
        self.buffer.append(fragment);

        let mut pieces = Vec::new();
        while self.buffer.is_finish() {
            pieces.extend(self.buffer.reset());
        }

        if !pieces.is_empty() {
            tracing::trace!(channel = %self.channel, count = pieces.len(), "Pieces completed");
        }
        pieces
    }

    /// Feed raw bytes read from the channel.
    ///
    /// A multi-byte character cut in half by the read boundary is held back
    /// until the rest of it arrives. Invalid sequences become U+FFFD.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(bytes);
        let text = decode_complete(&mut self.partial);
        self.feed(&text)
    }

    /// Flush held-back bytes at end of stream and return what is pending.
    pub fn finish(&mut self) -> Vec<String> {
        if self.partial.is_empty() {
            return Vec::new();
        }
        let rest = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        self.feed(&rest)
    }

    /// Content received since the last emitted piece.
    #[must_use]
    pub fn pending(&self) -> &str {
        self.buffer.pending()
    }

    /// All text fed so far, whether emitted as pieces or still pending.
    #[must_use]
    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

/// Decode the longest valid prefix of `bytes`, leaving an incomplete
/// trailing sequence in place.
fn decode_complete(bytes: &mut Vec<u8>) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut rest: &[u8] = bytes;

    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                rest = &[];
                break;
            }
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match err.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[len..];
                    }
                    None => {
                        rest = after;
                        break;
                    }
                }
            }
        }
    }

    let keep = rest.len();
    let drop_len = bytes.len() - keep;
    bytes.drain(..drop_len);
    out
}
