//! Emotion presets and their pose-weight tables.

use serde::{Deserialize, Serialize};

/// The closed set of facial-expression presets. Every value maps to a pose
/// table below, so the animator never sees an unmapped expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmotionTarget {
    #[default]
    Neutral,
    Happy,
    Encouraging,
    Thinking,
    Excited,
    Listening,
}

impl EmotionTarget {
    pub const ALL: [EmotionTarget; 6] = [
        EmotionTarget::Neutral,
        EmotionTarget::Happy,
        EmotionTarget::Encouraging,
        EmotionTarget::Thinking,
        EmotionTarget::Excited,
        EmotionTarget::Listening,
    ];

    /// Target weights for this preset. Channels not listed here are left
    /// alone by the emotion blend, which is how neutral actively relaxes
    /// the face: it names the expressive channels with zero targets.
    pub fn pose(&self) -> &'static [(&'static str, f32)] {
        match self {
            EmotionTarget::Neutral => &[
                ("mouthSmile", 0.0),
                ("mouthFrown", 0.0),
                ("browInnerUp", 0.0),
                ("eyeSquint", 0.0),
            ],
            EmotionTarget::Happy => &[("mouthSmile", 0.7), ("browInnerUp", 0.3)],
            EmotionTarget::Encouraging => &[("mouthSmile", 0.5), ("browInnerUp", 0.2)],
            EmotionTarget::Thinking => &[("mouthFunnel", 0.3), ("browInnerUp", 0.4)],
            EmotionTarget::Excited => &[
                ("mouthSmile", 0.9),
                ("eyeWide", 0.6),
                ("browInnerUp", 0.5),
            ],
            EmotionTarget::Listening => &[("browInnerUp", 0.2), ("eyeWide", 0.3)],
        }
    }

    /// The weight this preset assigns to `channel`, zero when unmentioned.
    pub fn weight_for(&self, channel: &str) -> f32 {
        self.pose()
            .iter()
            .find(|(name, _)| *name == channel)
            .map(|(_, weight)| *weight)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preset_has_a_pose() {
        for emotion in EmotionTarget::ALL {
            assert!(!emotion.pose().is_empty(), "{emotion:?} has no pose table");
        }
    }

    #[test]
    fn pose_weights_stay_in_range() {
        for emotion in EmotionTarget::ALL {
            for (channel, weight) in emotion.pose() {
                assert!(
                    (0.0..=1.0).contains(weight),
                    "{emotion:?} weight for {channel} out of range"
                );
            }
        }
    }

    #[test]
    fn weight_lookup() {
        assert_eq!(EmotionTarget::Happy.weight_for("mouthSmile"), 0.7);
        assert_eq!(EmotionTarget::Happy.weight_for("viseme_aa"), 0.0);
        assert_eq!(EmotionTarget::Neutral.weight_for("mouthSmile"), 0.0);
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&EmotionTarget::Encouraging).unwrap();
        assert_eq!(json, "\"encouraging\"");
        let back: EmotionTarget = serde_json::from_str("\"thinking\"").unwrap();
        assert_eq!(back, EmotionTarget::Thinking);
    }
}
