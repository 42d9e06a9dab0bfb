//! Response-body decompression.
//!
//! Only gzip is decoded; any other content encoding passes through to the
//! translator untouched.

use async_compression::tokio::bufread::GzipDecoder;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ResponseEncoding {
	#[default]
	None,
	Gzip,
}

/// Inspects a `content-encoding` header value.
pub fn detect(content_encoding: Option<&str>) -> ResponseEncoding {
	let Some(raw) = content_encoding else {
		return ResponseEncoding::None;
	};
	let gzip = raw
		.split(',')
		.map(str::trim)
		.any(|token| token.eq_ignore_ascii_case("gzip"));
	if gzip {
		ResponseEncoding::Gzip
	} else {
		ResponseEncoding::None
	}
}

/// Decompresses a buffered body according to the recorded encoding.
pub async fn decode(encoding: ResponseEncoding, body: Bytes) -> std::io::Result<Bytes> {
	match encoding {
		ResponseEncoding::None => Ok(body),
		ResponseEncoding::Gzip => {
			let reader = GzipDecoder::new(BufReader::new(body.as_ref()));
			read_to_bytes(reader).await
		},
	}
}

async fn read_to_bytes<R>(mut reader: R) -> std::io::Result<Bytes>
where
	R: AsyncRead + Unpin,
{
	let mut buffer = BytesMut::with_capacity(8192);
	loop {
		let n = reader.read_buf(&mut buffer).await?;
		if n == 0 {
			break;
		}
	}
	Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
	use async_compression::tokio::bufread::GzipEncoder;

	use super::*;

	async fn gzip(data: &[u8]) -> Bytes {
		read_to_bytes(GzipEncoder::new(BufReader::new(data)))
			.await
			.unwrap()
	}

	#[test]
	fn detects_gzip_tokens() {
		assert_eq!(detect(None), ResponseEncoding::None);
		assert_eq!(detect(Some("gzip")), ResponseEncoding::Gzip);
		assert_eq!(detect(Some("identity, gzip")), ResponseEncoding::Gzip);
		assert_eq!(detect(Some("br")), ResponseEncoding::None);
	}

	#[tokio::test]
	async fn gzip_round_trip() {
		let original = b"a body large enough to be worth compressing".as_slice();
		let compressed = gzip(original).await;
		let decoded = decode(ResponseEncoding::Gzip, compressed).await.unwrap();
		assert_eq!(decoded.as_ref(), original);
	}

	#[tokio::test]
	async fn plain_bodies_pass_through() {
		let body = Bytes::from_static(b"plain");
		let out = decode(ResponseEncoding::None, body.clone()).await.unwrap();
		assert_eq!(out, body);
	}
}
