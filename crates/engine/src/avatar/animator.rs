//! The per-tick pose animator.
//!
//! Frame order matters: idle sway first, then the emotion blend, then the
//! audio-driven mouth, and the blink pulse last so it overrides whatever the
//! blends did to the eyelids.

use super::emotion::EmotionTarget;
use super::loudness::{ANALYSIS_WINDOW, LoudnessMeter};
use super::rig::AvatarRig;
use crate::state::SharedState;
use prattle_realtime::AudioSink;
use rand::Rng;
use std::collections::HashMap;

const IDLE_RATE: f32 = 0.6;
const IDLE_YAW_AMPLITUDE: f32 = 0.05;
const IDLE_BOB_AMPLITUDE: f32 = 0.02;
const BLINK_MIN_INTERVAL: f32 = 3.0;
const BLINK_MAX_INTERVAL: f32 = 5.0;
const BLINK_DURATION: f32 = 0.15;
const EMOTION_SMOOTHING: f32 = 0.1;
const MOUTH_SMOOTHING: f32 = 0.4;
const MOUTH_GAIN: f32 = 1.2;

/// One tick's pose output: morph weights in `[0, 1]` plus head motion in
/// radians-ish units small enough to read as sway.
#[derive(Debug, Clone, Default)]
pub struct PoseFrame {
    pub weights: HashMap<String, f32>,
    pub head_yaw: f32,
    pub head_bob: f32,
}

/// Converts shared session state plus the remote audio window into pose
/// frames. Owned by whatever render or logging loop drives the avatar; never
/// shared across threads.
pub struct Animator {
    shared: SharedState,
    rig: Option<AvatarRig>,
    audio: Option<AudioSink>,
    meter: LoudnessMeter,
    influences: HashMap<String, f32>,
    idle_phase: f32,
    blink_clock: f32,
    blink_interval: f32,
}

impl Animator {
    pub fn new(shared: SharedState) -> Self {
        Animator {
            shared,
            rig: None,
            audio: None,
            meter: LoudnessMeter::new(),
            influences: HashMap::new(),
            idle_phase: 0.0,
            blink_clock: 0.0,
            blink_interval: rand::rng().random_range(BLINK_MIN_INTERVAL..=BLINK_MAX_INTERVAL),
        }
    }

    /// Installs the loaded rig. Until this is called every tick returns
    /// `None` and the caller just tries again next frame.
    pub fn set_rig(&mut self, rig: AvatarRig) {
        self.rig = Some(rig);
    }

    /// Points the mouth analysis at a session's remote audio.
    pub fn attach_audio(&mut self, sink: AudioSink) {
        self.meter.reset();
        self.audio = Some(sink);
    }

    pub fn detach_audio(&mut self) {
        self.audio = None;
    }

    /// Advances the animation by `dt` seconds.
    pub fn tick(&mut self, dt: f32) -> Option<PoseFrame> {
        let rig = self.rig.as_ref()?;

        self.idle_phase += dt * IDLE_RATE;
        let head_yaw = self.idle_phase.sin() * IDLE_YAW_AMPLITUDE;
        let head_bob = (self.idle_phase * 2.0).sin() * IDLE_BOB_AMPLITUDE;

        self.blink_clock += dt;
        if self.blink_clock >= self.blink_interval {
            self.blink_clock = 0.0;
            self.blink_interval =
                rand::rng().random_range(BLINK_MIN_INTERVAL..=BLINK_MAX_INTERVAL);
        }
        let blink = if self.blink_clock < BLINK_DURATION {
            (self.blink_clock * std::f32::consts::PI / BLINK_DURATION).sin()
        } else {
            0.0
        };

        // With no live audio the face holds still apart from sway and blinks.
        if let Some(sink) = self.audio.as_ref().filter(|sink| !sink.is_detached()) {
            let target = if self.shared.speaking() {
                EmotionTarget::Listening
            } else {
                self.shared.emotion()
            };
            for (channel, weight) in target.pose() {
                if rig.has(channel) {
                    let current = self.influences.get(*channel).copied().unwrap_or(0.0);
                    self.influences.insert(
                        (*channel).to_owned(),
                        lerp(current, *weight, EMOTION_SMOOTHING),
                    );
                }
            }

            let window = sink.window(ANALYSIS_WINDOW);
            let loudness = self.meter.measure(&window);
            let boosted = (loudness * MOUTH_GAIN).min(1.0);
            for channel in rig.mouth_channels() {
                let goal = (target.weight_for(channel) + boosted).clamp(0.0, 1.0);
                let current = self.influences.get(channel).copied().unwrap_or(0.0);
                self.influences
                    .insert(channel.clone(), lerp(current, goal, MOUTH_SMOOTHING));
            }
        }

        // Blink wins over any blended eyelid weight.
        for channel in rig.blink_channels() {
            self.influences.insert(channel.clone(), blink);
        }

        Some(PoseFrame {
            weights: self.influences.clone(),
            head_yaw,
            head_bob,
        })
    }
}

fn lerp(from: f32, to: f32, factor: f32) -> f32 {
    from + (to - from) * factor
}
