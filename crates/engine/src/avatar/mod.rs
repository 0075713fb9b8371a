//! Avatar animation: emotion presets, the morph-channel rig, loudness
//! analysis and the per-tick animator.

mod animator;
mod emotion;
mod loudness;
mod rig;

pub use animator::{Animator, PoseFrame};
pub use emotion::EmotionTarget;
pub use loudness::{ANALYSIS_WINDOW, LoudnessMeter};
pub use rig::{AvatarRig, BLINK_CHANNELS, MOUTH_CHANNELS};
