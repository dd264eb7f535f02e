use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// A type for reading server-sent events from a chunk stream.
///
/// Only the `data` field is surfaced. Comment lines (keep-alives) and the
/// other fields are skipped, and an event made of several `data` lines is
/// joined with line feeds.
pub struct Sse {
    buf: String,
    pending: Vec<u8>,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: String::new(),
            pending: Vec::new(),
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Drain complete events already in the buffer before reading.
            if let Some(event) = self.try_parse_event() {
                if event.is_empty() {
                    continue;
                }
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            else {
                if !self.pending.is_empty() {
                    return Err(Error::InvalidPayload);
                }
                return Ok(None);
            };

            // A multi-byte character may be split across chunks, so keep
            // the undecoded tail around until the next chunk arrives.
            self.pending.extend_from_slice(&bytes);
            match str::from_utf8(&self.pending) {
                Ok(s) => {
                    self.buf.push_str(&s.replace("\r\n", "\n"));
                    self.pending.clear();
                }
                Err(err) if err.error_len().is_none() => {
                    let valid = err.valid_up_to();
                    let s = str::from_utf8(&self.pending[..valid])
                        .map_err(|_| Error::InvalidPayload)?;
                    self.buf.push_str(&s.replace("\r\n", "\n"));
                    self.pending.drain(..valid);
                }
                Err(_) => return Err(Error::InvalidPayload),
            }
        }
    }

    /// Pops one event from the buffer. Returns an empty string for events
    /// without any `data` field.
    fn try_parse_event(&mut self) -> Option<String> {
        let eol_idx = self.buf.find("\n\n")?;

        let mut data_lines = vec![];
        for line in self.buf[0..eol_idx].lines() {
            if line.starts_with(':') {
                continue;
            }
            let (name, value) = line.split_once(':').unwrap_or((line, ""));
            if name == "data" {
                data_lines.push(value.strip_prefix(' ').unwrap_or(value));
            }
        }
        let data = data_lines.join("\n");

        // Consume the bytes from the buffer.
        self.buf.drain(0..eol_idx + 2);

        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_normal_events() {
        let chunks =
            Chunks::from_static(&[b"data: hello\n\n", b"data: bye\n\ndata: ok\n\n"]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "bye");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "ok");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quirk_streaming() {
        let chunks = Chunks::from_static(&[b"data:", b" hello\r\n", b"\r\n"]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_utf8() {
        let bytes = "data: 日本\n\n".as_bytes();
        // Split inside the first character.
        let (head, tail) = bytes.split_at(7);
        let head: &'static [u8] = Box::leak(head.to_vec().into_boxed_slice());
        let tail: &'static [u8] = Box::leak(tail.to_vec().into_boxed_slice());
        let mut sse = Sse::new(Chunks::from_static(&[head, tail]));
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "日本");
    }

    #[tokio::test]
    async fn test_comments_and_other_fields() {
        let chunks = Chunks::from_static(&[
            b": keep-alive\n\n",
            b"event: message\ndata: a\ndata: b\n\n",
        ]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "a\nb");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incomplete_data() {
        let chunks = Chunks::from_static(&[b"data: hello\n", b"data: bye\n"]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap(), None);

        let chunks = Chunks::from_static(&[b"\xff\xfe\n\n"]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);
    }
}
