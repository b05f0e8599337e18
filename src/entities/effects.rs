//! Effect types and their evaluation policy.
//!
//! The set of effects is closed and every per-type decision the traversal
//! needs (input arity, early-out) is answered here by matching on the type.
//! Pixel math lives behind [`EffectCompositor`](crate::core::compositor::EffectCompositor);
//! this module only describes *how to walk*, not what the pixels become.

use serde::{Deserialize, Serialize};

/// Input requirement, decided from the effect type and its factor before any
/// input is evaluated. Skipping an input here means its strip (and decoder)
/// is never touched for this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EarlyOut {
    /// Generator: inputs are ignored entirely.
    NoInputNeeded,
    /// Output equals input 1 unchanged; input 2 and the combine step are skipped.
    Input1Only,
    /// Output equals input 2 unchanged.
    Input2Only,
    /// Both inputs are required and combined.
    NoEarlyOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectType {
    /// Linear crossfade between the two inputs.
    Cross,
    /// Crossfade weighted in gamma space; same traversal as Cross.
    GammaCross,
    Add,
    Subtract,
    Multiply,
    /// Input 2 composited over input 1 by input 2's alpha.
    AlphaOver,
    /// Directional reveal of input 2 over input 1.
    Wipe,
    /// Single-input halo.
    Glow,
    /// Plays input 1 with remapped time; the one effect that changes the
    /// frame number it recurses at.
    Speed,
    /// No declared inputs; renders whatever sits on lower channels.
    Adjustment,
    /// Solid color generator.
    SolidColor { rgba: [u8; 4] },
}

impl EffectType {
    pub fn name(&self) -> &'static str {
        match self {
            EffectType::Cross => "Cross",
            EffectType::GammaCross => "Gamma Cross",
            EffectType::Add => "Add",
            EffectType::Subtract => "Subtract",
            EffectType::Multiply => "Multiply",
            EffectType::AlphaOver => "Alpha Over",
            EffectType::Wipe => "Wipe",
            EffectType::Glow => "Glow",
            EffectType::Speed => "Speed",
            EffectType::Adjustment => "Adjustment",
            EffectType::SolidColor { .. } => "Color",
        }
    }

    /// Declared input arity (0, 1 or 2).
    pub fn input_count(&self) -> u8 {
        match self {
            EffectType::Adjustment | EffectType::SolidColor { .. } => 0,
            EffectType::Glow | EffectType::Speed => 1,
            EffectType::Cross
            | EffectType::GammaCross
            | EffectType::Add
            | EffectType::Subtract
            | EffectType::Multiply
            | EffectType::AlphaOver
            | EffectType::Wipe => 2,
        }
    }

    /// Early-out policy at the given blend factor.
    ///
    /// Fades pass through input 1 at factor 0 and input 2 at factor 1;
    /// additive-style mixers and glow pass through input 1 at factor 0
    /// because the boost contributes nothing there.
    pub fn early_out(&self, factor: f32) -> EarlyOut {
        match self {
            EffectType::Adjustment | EffectType::SolidColor { .. } => EarlyOut::NoInputNeeded,
            EffectType::Speed => EarlyOut::Input1Only,
            EffectType::Cross | EffectType::GammaCross | EffectType::Wipe => {
                if factor <= 0.0 {
                    EarlyOut::Input1Only
                } else if factor >= 1.0 {
                    EarlyOut::Input2Only
                } else {
                    EarlyOut::NoEarlyOut
                }
            }
            EffectType::Add
            | EffectType::Subtract
            | EffectType::Multiply
            | EffectType::AlphaOver
            | EffectType::Glow => {
                if factor <= 0.0 {
                    EarlyOut::Input1Only
                } else {
                    EarlyOut::NoEarlyOut
                }
            }
        }
    }

    pub fn default_factor(&self) -> f32 {
        1.0
    }
}
