//! Strips: the placed units of content making up a timeline.
//!
//! A strip couples identity (stable id plus per-timeline-unique name),
//! placement (channel, start, trim offsets) and a kind payload. Kind payloads
//! are a closed enum dispatched through [`StripOps`], so per-kind behavior
//! lives in one table instead of scattered matches.
//!
//! Placement math: `start` is where the content logically begins and `len`
//! how many frames it covers. The *displayed* span is
//! `[left_handle, right_handle)` = `start + offset_left` to
//! `start + len - offset_right`. Negative offsets extend the span past the
//! content (still-frame padding); the right handle never crosses the left
//! one, so a span is at least one frame and never inverted.

use std::fmt;
use std::path::{Path, PathBuf};

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{DEFAULT_PROXY_QUALITY, MAX_CHANNELS};

use super::channel::ChannelSet;
use super::effects::EffectType;

/// Stable strip handle. All graph references (effect inputs, meta children,
/// seqbase order) go through ids into the arena owned by
/// [`Editing`](super::editing::Editing); nothing holds a direct reference, so
/// removal can never dangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StripId(Uuid);

impl StripId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Proxy generation settings carried by movie strips.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    pub enabled: bool,
    pub sizes: Vec<ProxySize>,
    /// JPEG quality of generated proxy frames.
    pub quality: u8,
    /// Proxy output root; defaults to a `proxy` directory next to the source.
    pub custom_dir: Option<PathBuf>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            sizes: Vec::new(),
            quality: DEFAULT_PROXY_QUALITY,
            custom_dir: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProxySize {
    P25,
    P50,
    P75,
    P100,
}

impl ProxySize {
    pub fn percent(&self) -> u32 {
        match self {
            ProxySize::P25 => 25,
            ProxySize::P50 => 50,
            ProxySize::P75 => 75,
            ProxySize::P100 => 100,
        }
    }

    pub fn fraction(&self) -> f64 {
        self.percent() as f64 / 100.0
    }
}

// === Kind payloads ===

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageStrip {
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovieStrip {
    pub path: PathBuf,
    pub proxy: ProxySettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoundStrip {
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorStrip {
    pub rgba: [u8; 4],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextStrip {
    pub text: String,
}

/// Nested timeline. Owns its child list and channel registry exclusively;
/// both die with the strip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetaStrip {
    pub(crate) seqbase: Vec<StripId>,
    pub(crate) channels: ChannelSet,
}

impl MetaStrip {
    pub fn seqbase(&self) -> &[StripId] {
        &self.seqbase
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }
}

/// Effect node: non-owning input references into the same arena.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectStrip {
    pub effect: EffectType,
    pub(crate) input1: Option<StripId>,
    pub(crate) input2: Option<StripId>,
    pub(crate) factor: f32,
}

impl EffectStrip {
    pub fn input1(&self) -> Option<StripId> {
        self.input1
    }

    pub fn input2(&self) -> Option<StripId> {
        self.input2
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }
}

// === Per-kind behavior ===

/// The per-kind behavior table. One `match`-free call site per question the
/// engine asks of a kind.
#[enum_dispatch]
pub trait StripOps {
    /// Human-readable kind label.
    fn kind_name(&self) -> &'static str;

    /// Backing media file, for kinds that have one.
    fn source_path(&self) -> Option<&Path> {
        None
    }

    /// True when the content is a single frame held for the whole span
    /// (stills, solids, text cards). Such strips decode and cache one frame
    /// regardless of the timeline position queried.
    fn single_frame_content(&self) -> bool {
        false
    }

    /// True when proxy media can be built for this kind.
    fn supports_proxy(&self) -> bool {
        false
    }

    /// False for kinds that never produce pixels (audio).
    fn is_visual(&self) -> bool {
        true
    }
}

impl StripOps for ImageStrip {
    fn kind_name(&self) -> &'static str {
        "Image"
    }

    fn source_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn single_frame_content(&self) -> bool {
        true
    }
}

impl StripOps for MovieStrip {
    fn kind_name(&self) -> &'static str {
        "Movie"
    }

    fn source_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn supports_proxy(&self) -> bool {
        true
    }
}

impl StripOps for SoundStrip {
    fn kind_name(&self) -> &'static str {
        "Sound"
    }

    fn source_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn is_visual(&self) -> bool {
        false
    }
}

impl StripOps for ColorStrip {
    fn kind_name(&self) -> &'static str {
        "Color"
    }

    fn single_frame_content(&self) -> bool {
        true
    }
}

impl StripOps for TextStrip {
    fn kind_name(&self) -> &'static str {
        "Text"
    }

    fn single_frame_content(&self) -> bool {
        true
    }
}

impl StripOps for MetaStrip {
    fn kind_name(&self) -> &'static str {
        "Meta"
    }
}

impl StripOps for EffectStrip {
    fn kind_name(&self) -> &'static str {
        self.effect.name()
    }
}

#[enum_dispatch(StripOps)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StripKind {
    Image(ImageStrip),
    Movie(MovieStrip),
    Sound(SoundStrip),
    Color(ColorStrip),
    Text(TextStrip),
    Meta(MetaStrip),
    Effect(EffectStrip),
}

impl StripKind {
    /// Atomic = content supplied by the decoder collaborator (not composed
    /// from other strips).
    pub fn is_atomic(&self) -> bool {
        !matches!(self, StripKind::Meta(_) | StripKind::Effect(_))
    }
}

// === Strip ===

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Strip {
    id: StripId,
    pub(crate) name: String,
    pub(crate) channel: i32,
    pub(crate) start: i64,
    pub(crate) len: i64,
    pub(crate) offset_left: i64,
    pub(crate) offset_right: i64,
    pub(crate) muted: bool,
    pub(crate) locked: bool,
    pub(crate) selected: bool,
    pub(crate) kind: StripKind,
}

impl Strip {
    pub fn new(name: impl Into<String>, kind: StripKind, channel: i32, start: i64, len: i64) -> Self {
        Self {
            id: StripId::new(),
            name: name.into(),
            channel: channel.clamp(1, MAX_CHANNELS),
            start,
            len: len.max(1),
            offset_left: 0,
            offset_right: 0,
            muted: false,
            locked: false,
            selected: false,
            kind,
        }
    }

    pub fn image(name: impl Into<String>, path: impl Into<PathBuf>, channel: i32, start: i64, len: i64) -> Self {
        Self::new(name, StripKind::Image(ImageStrip { path: path.into() }), channel, start, len)
    }

    pub fn movie(name: impl Into<String>, path: impl Into<PathBuf>, channel: i32, start: i64, len: i64) -> Self {
        Self::new(
            name,
            StripKind::Movie(MovieStrip {
                path: path.into(),
                proxy: ProxySettings::default(),
            }),
            channel,
            start,
            len,
        )
    }

    pub fn sound(name: impl Into<String>, path: impl Into<PathBuf>, channel: i32, start: i64, len: i64) -> Self {
        Self::new(name, StripKind::Sound(SoundStrip { path: path.into() }), channel, start, len)
    }

    pub fn color(name: impl Into<String>, rgba: [u8; 4], channel: i32, start: i64, len: i64) -> Self {
        Self::new(name, StripKind::Color(ColorStrip { rgba }), channel, start, len)
    }

    pub fn text(name: impl Into<String>, text: impl Into<String>, channel: i32, start: i64, len: i64) -> Self {
        Self::new(name, StripKind::Text(TextStrip { text: text.into() }), channel, start, len)
    }

    pub fn meta(name: impl Into<String>, channel: i32, start: i64, len: i64) -> Self {
        Self::new(
            name,
            StripKind::Meta(MetaStrip {
                seqbase: Vec::new(),
                channels: ChannelSet::new(),
            }),
            channel,
            start,
            len,
        )
    }

    pub fn effect(name: impl Into<String>, effect: EffectType, channel: i32, start: i64, len: i64) -> Self {
        let factor = effect.default_factor();
        Self::new(
            name,
            StripKind::Effect(EffectStrip {
                effect,
                input1: None,
                input2: None,
                factor,
            }),
            channel,
            start,
            len,
        )
    }

    // --- Identity ---

    pub fn id(&self) -> StripId {
        self.id
    }

    /// Duplicates get a fresh identity; names are uniquified by the caller.
    pub(crate) fn reissue_id(&mut self) {
        self.id = StripId::new();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // --- Placement ---

    pub fn channel(&self) -> i32 {
        self.channel
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn len(&self) -> i64 {
        self.len
    }

    pub fn offsets(&self) -> (i64, i64) {
        (self.offset_left, self.offset_right)
    }

    /// First displayed frame.
    pub fn left_handle(&self) -> i64 {
        self.start + self.offset_left
    }

    /// One past the last displayed frame. Clamped so the span is never
    /// inverted: the right handle yields to the left one.
    pub fn right_handle(&self) -> i64 {
        let left = self.left_handle();
        (self.start + self.len - self.offset_right).max(left + 1)
    }

    /// Displayed span `[left, right)`.
    pub fn span(&self) -> (i64, i64) {
        (self.left_handle(), self.right_handle())
    }

    pub fn contains_frame(&self, frame: i64) -> bool {
        frame >= self.left_handle() && frame < self.right_handle()
    }

    // --- Flags ---

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn selected(&self) -> bool {
        self.selected
    }

    // --- Kind ---

    pub fn kind(&self) -> &StripKind {
        &self.kind
    }

    pub fn is_meta(&self) -> bool {
        matches!(self.kind, StripKind::Meta(_))
    }

    pub fn is_effect(&self) -> bool {
        matches!(self.kind, StripKind::Effect(_))
    }

    pub fn as_meta(&self) -> Option<&MetaStrip> {
        match &self.kind {
            StripKind::Meta(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn as_meta_mut(&mut self) -> Option<&mut MetaStrip> {
        match &mut self.kind {
            StripKind::Meta(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_effect(&self) -> Option<&EffectStrip> {
        match &self.kind {
            StripKind::Effect(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn as_effect_mut(&mut self) -> Option<&mut EffectStrip> {
        match &mut self.kind {
            StripKind::Effect(e) => Some(e),
            _ => None,
        }
    }

    /// Proxy settings, for kinds that can carry them.
    pub fn proxy(&self) -> Option<&ProxySettings> {
        match &self.kind {
            StripKind::Movie(m) => Some(&m.proxy),
            _ => None,
        }
    }

    pub fn proxy_mut(&mut self) -> Option<&mut ProxySettings> {
        match &mut self.kind {
            StripKind::Movie(m) => Some(&mut m.proxy),
            _ => None,
        }
    }
}
