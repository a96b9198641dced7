//! One-shot response body.
//!
//! A `Body` is a readable stream that can be consumed exactly once. Code that
//! drains a body for inspection must put an equivalent body back (see
//! [`Body::from`] for `Bytes`) before the response leaves its hands.

use bytes::Bytes;
use std::fmt;
use std::io::{self, Cursor, Read};

/// Streaming body of a relay or decoded response.
pub struct Body {
    reader: Box<dyn Read + Send>,
}

impl Body {
    /// A body with no content.
    pub fn empty() -> Self {
        Self::from_reader(io::empty())
    }

    /// Wrap an arbitrary reader.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
        }
    }

    /// Read the stream to its end and close it.
    pub fn into_bytes(mut self) -> io::Result<Bytes> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_reader(Cursor::new(bytes))
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(Bytes::from(bytes))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::from(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::from(Bytes::from(s))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").finish_non_exhaustive()
    }
}
