use bytes::Bytes;
use std::fmt;

/// WorkItem is an opaque payload moving through a queue.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct WorkItem(Bytes);

impl WorkItem {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        WorkItem(payload.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&'static str> for WorkItem {
    fn from(payload: &'static str) -> Self {
        WorkItem(Bytes::from_static(payload.as_bytes()))
    }
}

impl From<String> for WorkItem {
    fn from(payload: String) -> Self {
        WorkItem(Bytes::from(payload))
    }
}

impl From<Bytes> for WorkItem {
    fn from(payload: Bytes) -> Self {
        WorkItem(payload)
    }
}

// Payloads are usually ASCII; anything else is shown lossily.
impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkItem({:?})", String::from_utf8_lossy(&self.0))
    }
}
