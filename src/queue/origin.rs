use codec::{Decode, Encode};
use std::fmt;

/// Origin of a queued message, laid out like the parachain
/// `AggregateMessageOrigin` so it round-trips through storage keys and call
/// arguments unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum MessageOrigin {
    #[codec(index = 0)]
    Here,
    #[codec(index = 1)]
    Parent,
    #[codec(index = 2)]
    Sibling(u32),
}

impl MessageOrigin {
    /// Decodes an origin from its exact SCALE encoding.
    pub fn from_scale(bytes: &[u8]) -> Result<Self, codec::Error> {
        let mut input = bytes;
        let origin = Self::decode(&mut input)?;
        if !input.is_empty() {
            return Err("trailing bytes after message origin".into());
        }
        Ok(origin)
    }
}

impl fmt::Display for MessageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageOrigin::Here => write!(f, "here"),
            MessageOrigin::Parent => write!(f, "parent"),
            MessageOrigin::Sibling(para_id) => write!(f, "sibling({para_id})"),
        }
    }
}
