#[cfg(test)]
use std::collections::VecDeque;

use bytes::Bytes;
use reqwest::Response;

/// A transport failure while reading the response body.
#[derive(Debug, PartialEq, Eq)]
pub struct Error(pub String);

/// The raw body of a streaming completion, read piece by piece.
pub struct Chunks {
    source: Source,
    received: usize,
}

enum Source {
    Response(Response),
    #[cfg(test)]
    Fixture(VecDeque<Bytes>),
}

impl Chunks {
    pub fn from_response(response: Response) -> Self {
        Self::new(Source::Response(response))
    }

    /// Replays a recorded body, split at the given boundaries.
    #[cfg(test)]
    pub fn from_static(chunks: &[&'static [u8]]) -> Self {
        let fixture = chunks.iter().map(|c| Bytes::from_static(c)).collect();
        Self::new(Source::Fixture(fixture))
    }

    fn new(source: Source) -> Self {
        Self {
            source,
            received: 0,
        }
    }

    /// Returns the next piece of the body, or `None` at its end.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        let chunk = match &mut self.source {
            Source::Response(response) => {
                response.chunk().await.map_err(|err| Error(err.to_string()))?
            }
            #[cfg(test)]
            Source::Fixture(fixture) => fixture.pop_front(),
        };
        match &chunk {
            Some(bytes) => self.received += bytes.len(),
            None => trace!("response body finished after {} bytes", self.received),
        }
        Ok(chunk)
    }
}
