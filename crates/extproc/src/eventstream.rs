//! Buffering decoder for the AWS binary event-stream framing.
//!
//! Response-body chunks from the proxy can split frames at arbitrary byte
//! boundaries. The decoder accumulates bytes across calls, emits every
//! complete frame, and keeps the incomplete tail for the next call. A
//! protocol error is handled the same way as an incomplete frame: decoding
//! stops and the remaining bytes are retained, so a frame split mid-prelude
//! never drops data.

use aws_smithy_eventstream::frame::{DecodedFrame, MessageFrameDecoder};
use aws_smithy_types::event_stream::Message;
use bytes::BytesMut;
use tracing::debug;

#[derive(Default)]
pub struct FrameDecoder {
	inner: MessageFrameDecoder,
	buffer: BytesMut,
}

impl std::fmt::Debug for FrameDecoder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FrameDecoder")
			.field("buffered", &self.buffer.len())
			.finish()
	}
}

impl FrameDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends `input` to the internal buffer and decodes as many complete
	/// frames as are available.
	pub fn feed(&mut self, input: &[u8]) -> Vec<Message> {
		self.buffer.extend_from_slice(input);
		let mut frames = Vec::new();
		loop {
			match self.inner.decode_frame(&mut self.buffer) {
				Ok(DecodedFrame::Complete(message)) => frames.push(message),
				Ok(DecodedFrame::Incomplete) => break,
				Err(err) => {
					debug!("event-stream frame decode stalled, retaining {} buffered bytes: {err}", self.buffer.len());
					break;
				},
			}
		}
		frames
	}

	/// Bytes currently held waiting for the rest of a frame.
	pub fn buffered_len(&self) -> usize {
		self.buffer.len()
	}
}
