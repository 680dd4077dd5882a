//! Caller identity for synthesized ownership.

use fuser::Request;

/// Identity of the process issuing a filesystem call.
///
/// The device has no notion of ownership, so every entry is presented as
/// owned by whoever is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerContext {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

impl CallerContext {
    pub fn new(uid: u32, gid: u32, pid: u32) -> Self {
        Self { uid, gid, pid }
    }

    /// Extracts the caller from a FUSE request.
    pub fn from_request(req: &Request<'_>) -> Self {
        Self::new(req.uid(), req.gid(), req.pid())
    }
}

impl From<&Request<'_>> for CallerContext {
    fn from(req: &Request<'_>) -> Self {
        Self::from_request(req)
    }
}
