//! Timeline data model.
//!
//! Everything a timeline *is*: strips and their kinds, channels, the
//! placement resolver, the lookup index and the [`Editing`] root that ties
//! them together. Rendering and background work live in [`crate::core`];
//! nothing here touches a decoder or a thread.

pub mod channel;
pub mod editing;
pub mod effects;
pub mod frame;
pub mod lookup;
pub mod overlap;
pub mod strip;

pub use channel::{ChannelSet, TimelineChannel};
pub use editing::{Editing, MetaStackEntry, StripArena};
pub use effects::{EarlyOut, EffectType};
pub use frame::ImageBuffer;
pub use lookup::LookupIndex;
pub use overlap::{resolve_overlap, test_overlap};
pub use strip::{ProxySettings, ProxySize, Strip, StripId, StripKind, StripOps};
