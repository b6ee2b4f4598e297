//! The step taxonomy attached to emitted blocks.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Bitmask over step kinds, used to filter which steps a stream emits.
    ///
    /// [`Steps::NEW_IRREVERSIBLE`] is the union of [`Steps::NEW`] and
    /// [`Steps::IRREVERSIBLE`]: a filter that selects either of those also
    /// selects blocks delivered for the first time already final.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[repr(transparent)]
    pub struct Steps: u16 {
        /// First delivery of a block on the current best chain.
        const NEW = 1 << 0;
        /// A previously delivered block is rolled back by a chain switch.
        const UNDO = 1 << 1;
        /// A previously delivered block became final.
        const IRREVERSIBLE = 1 << 2;
        /// A block that fell below the last irreversible block on a
        /// non-canonical branch and will never become final.
        const STALLED = 1 << 3;
        /// A block delivered for the first time and already final.
        const NEW_IRREVERSIBLE = Self::NEW.bits() | Self::IRREVERSIBLE.bits();
    }
}

/// The step attached to a single emitted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    /// First delivery of a block on the current best chain.
    New,
    /// A previously delivered block is rolled back by a chain switch.
    Undo,
    /// A previously delivered block became final.
    Irreversible,
    /// A block delivered for the first time and already final.
    NewIrreversible,
    /// A block that fell below the last irreversible block on a
    /// non-canonical branch.
    Stalled,
}

impl Step {
    /// The bitmask selecting this step.
    pub const fn mask(self) -> Steps {
        match self {
            Self::New => Steps::NEW,
            Self::Undo => Steps::UNDO,
            Self::Irreversible => Steps::IRREVERSIBLE,
            Self::NewIrreversible => Steps::NEW_IRREVERSIBLE,
            Self::Stalled => Steps::STALLED,
        }
    }

    /// The numeric token used in the cursor wire form.
    pub const fn wire_token(self) -> u16 {
        self.mask().bits()
    }

    /// Parse a cursor wire form token.
    pub fn from_wire_token(token: u16) -> Option<Self> {
        let steps = Steps::from_bits(token)?;
        [Self::New, Self::Undo, Self::Irreversible, Self::NewIrreversible, Self::Stalled]
            .into_iter()
            .find(|step| step.mask() == steps)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Undo => write!(f, "undo"),
            Self::Irreversible => write!(f, "irreversible"),
            Self::NewIrreversible => write!(f, "new-irreversible"),
            Self::Stalled => write!(f, "stalled"),
        }
    }
}

impl From<Step> for Steps {
    fn from(step: Step) -> Self {
        step.mask()
    }
}
