//! splice - non-linear timeline compositing engine
//!
//! Strips on numbered channels, nested meta timelines, a small closed set of
//! effects, a recursive render pipeline with layered caching, and background
//! thumbnail and proxy builds. Media decoding and pixel math are
//! collaborators ([`Decoder`], [`EffectCompositor`]); the engine owns
//! structure, traversal and caching.

pub mod config;
pub mod core;
pub mod entities;
pub mod error;
pub mod events;

pub use core::compositor::{CpuCompositor, EffectCompositor};
pub use core::decode::Decoder;
pub use core::frame_cache::{CacheLayer, CacheScope, CacheStats, FrameCache, FrameKey};
pub use core::presence::PresenceCache;
pub use core::proxy::{ProxyReport, ProxySkip, ProxySubmission};
pub use core::render::RenderContext;
pub use core::thumbs::ThumbCache;

pub use entities::channel::{ChannelSet, TimelineChannel};
pub use entities::editing::{Editing, StripArena};
pub use entities::effects::{EarlyOut, EffectType};
pub use entities::frame::ImageBuffer;
pub use entities::strip::{ProxySettings, ProxySize, Strip, StripId, StripKind, StripOps};

pub use error::{Result, SpliceError};
pub use events::{EditEvent, EventSender};
