//! Input provenance.

use std::fmt;

/// Provenance tag on a dispatcher input.
///
/// Controls downstream policy such as whether a committed block is
/// rebroadcast with a local or remote tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputSource {
    /// Produced by this node (harvesting, local submission).
    Local,
    /// Pushed unsolicited by a remote peer.
    RemotePush,
    /// Pulled from a remote peer by the local synchronizer.
    RemotePull,
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputSource::Local => "local",
            InputSource::RemotePush => "remote-push",
            InputSource::RemotePull => "remote-pull",
        };
        f.write_str(name)
    }
}
