//! Engine modules: rendering, caches, background work.
//!
//! Collaborator traits ([`Decoder`](decode::Decoder),
//! [`EffectCompositor`](compositor::EffectCompositor)) sit at the media and
//! pixel-math seams; everything else is pure engine.

pub mod compositor;
pub mod decode;
pub mod frame_cache;
pub mod presence;
pub mod proxy;
pub mod render;
pub mod thumbs;
pub mod workers;

pub use compositor::{CpuCompositor, EffectCompositor};
pub use decode::Decoder;
pub use frame_cache::{CacheLayer, CacheScope, CacheStats, FrameCache, FrameKey};
pub use presence::PresenceCache;
pub use proxy::{ProxyJob, ProxyReport, ProxySkip, ProxySubmission};
pub use render::RenderContext;
pub use thumbs::ThumbCache;
pub use workers::Workers;
