use std::fmt;

use crate::error::HarnessError;

/// Largest node identity the fixed port layout can address.
pub const MAX_NODE_ID: u8 = 99;

/// Identity of a node in a local network, `0..=MAX_NODE_ID`.
///
/// Ports and the working directory name derive from it, so two nodes with
/// distinct identities never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u8);

impl NodeId {
    /// Validate `id` against [`MAX_NODE_ID`].
    pub fn new(id: u8) -> Result<Self, HarnessError> {
        if id > MAX_NODE_ID {
            return Err(HarnessError::Configuration(format!(
                "node id {id} is out of range (maximum is {MAX_NODE_ID})"
            )));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Name of the node's working directory under the harness root.
    pub fn dir_name(self) -> String {
        format!("BCNode{:02}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<u8> for NodeId {
    type Error = HarnessError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_full_range() {
        assert_eq!(NodeId::new(0).unwrap().get(), 0);
        assert_eq!(NodeId::new(MAX_NODE_ID).unwrap().get(), 99);
    }

    #[test]
    fn rejects_ids_above_the_maximum() {
        for id in [100, 101, u8::MAX] {
            let err = NodeId::new(id).unwrap_err();
            assert!(matches!(err, HarnessError::Configuration(_)), "{err}");
            assert!(err.to_string().contains(&id.to_string()));
        }
    }

    #[test]
    fn directory_names_are_zero_padded() {
        assert_eq!(NodeId::new(0).unwrap().dir_name(), "BCNode00");
        assert_eq!(NodeId::new(7).unwrap().dir_name(), "BCNode07");
        assert_eq!(NodeId::new(42).unwrap().dir_name(), "BCNode42");
        assert_eq!(NodeId::new(7).unwrap().to_string(), "7");
    }
}
