//! Items stored in the event window and the filters applied when reading them.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An immutable event: upstream id, optional source key, opaque payload.
///
/// The id is assigned by the item source and doubles as the virtual offset
/// once the sequencer has accepted the item.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Item<P> {
    pub id: u64,
    pub key: Option<String>,
    pub payload: P,
}

impl<P> Item<P> {
    /// Item without a secondary key. Only [`Filter::All`] will match it.
    pub fn new(id: u64, payload: P) -> Self {
        Self {
            id,
            key: None,
            payload,
        }
    }

    /// Item tagged with the source (agent, device, ...) that produced it.
    pub fn keyed(id: u64, key: impl Into<String>, payload: P) -> Self {
        Self {
            id,
            key: Some(key.into()),
            payload,
        }
    }

    #[inline]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

/// Restricts which items a read returns. Never affects which offsets are consumed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Filter {
    #[default]
    All,
    Key(String),
}

impl Filter {
    pub fn key(key: impl Into<String>) -> Self {
        Filter::Key(key.into())
    }

    #[inline]
    pub fn matches<P>(&self, item: &Item<P>) -> bool {
        match self {
            Filter::All => true,
            Filter::Key(wanted) => item.key() == Some(wanted.as_str()),
        }
    }
}

impl From<&str> for Filter {
    fn from(key: &str) -> Self {
        Filter::Key(key.to_owned())
    }
}

impl From<Option<&str>> for Filter {
    fn from(key: Option<&str>) -> Self {
        key.map_or(Filter::All, Filter::from)
    }
}
