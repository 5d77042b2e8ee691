use crate::model::Message;

pub const FRAME_START: u8 = b'!';
pub const FRAME_END: u8 = b'$';
/// Pending bytes allowed without a trailing sentinel before the buffer is discarded.
pub const MAX_PENDING: usize = 64 * 1024;

/// Wraps the JSON body of `msg` as `!<body>$`.
pub fn encode(msg: &Message) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(msg)?;
    let mut frame = Vec::with_capacity(body.len() + 2);
    frame.push(FRAME_START);
    frame.extend_from_slice(&body);
    frame.push(FRAME_END);
    Ok(frame)
}

/// Messages decoded from one chunk, plus the number of fragments thrown away.
#[derive(Debug, Default)]
pub struct Batch {
    pub messages: Vec<Message>,
    pub dropped: usize,
}

/// Incremental decoder for the `!...$` stream. Bytes after the last `$`
/// are held until the next chunk completes them.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Batch {
        self.pending.extend_from_slice(chunk);

        let mut batch = Batch::default();
        let Some(last_end) = self.pending.iter().rposition(|b| *b == FRAME_END) else {
            if self.pending.len() > MAX_PENDING {
                tracing::warn!(bytes = self.pending.len(), "discarding unterminated gateway frame");
                self.pending.clear();
                batch.dropped += 1;
            }
            return batch;
        };

        let complete: Vec<u8> = self.pending.drain(..=last_end).collect();
        for fragment in complete[..last_end].split(|b| *b == FRAME_END) {
            if fragment.is_empty() {
                continue;
            }
            match decode_fragment(fragment) {
                Some(msg) => batch.messages.push(msg),
                None => batch.dropped += 1,
            }
        }
        batch
    }
}

fn decode_fragment(fragment: &[u8]) -> Option<Message> {
    let Some(body) = fragment.strip_prefix(&[FRAME_START]) else {
        tracing::debug!(bytes = fragment.len(), "dropping gateway fragment without leading sentinel");
        return None;
    };
    match serde_json::from_slice(body) {
        Ok(msg) => Some(msg),
        Err(err) => {
            tracing::debug!(error = %err, "dropping malformed gateway frame");
            None
        }
    }
}
