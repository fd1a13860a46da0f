//! Completed responses and their bodies

use crate::error::SessionError;
use bytes::Bytes;
use courier_types::ResponseMetadata;
use memmap2::Mmap;
use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Outcome delivered to a completion callback
pub type TaskResult = Result<Response, SessionError>;

/// A successful response: metadata plus the body bytes
#[derive(Debug, Clone)]
pub struct Response {
    pub metadata: ResponseMetadata,
    pub body: ResponseBody,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.metadata.status
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Read-only view of a response body.
///
/// Either owned bytes or a memory-mapped file. A mapping stays readable after
/// the file it came from is unlinked, so bodies outlive the engine's
/// temporary files without being copied into memory.
#[derive(Clone)]
pub struct ResponseBody(Repr);

#[derive(Clone)]
enum Repr {
    Memory(Bytes),
    Mapped(Arc<Mmap>),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self(Repr::Memory(Bytes::new()))
    }

    pub fn mapped(map: Mmap) -> Self {
        Self(Repr::Mapped(Arc::new(map)))
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.0, Repr::Mapped(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.0 {
            Repr::Memory(bytes) => &bytes[..],
            Repr::Mapped(map) => &map[..],
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl Deref for ResponseBody {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for ResponseBody {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        Self(Repr::Memory(bytes))
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Repr::Memory(Bytes::from(bytes)))
    }
}

impl PartialEq<[u8]> for ResponseBody {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl PartialEq<&[u8]> for ResponseBody {
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_bytes() == *other
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_mapped() { "mapped" } else { "memory" };
        f.debug_struct("ResponseBody")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}
