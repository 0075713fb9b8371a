//! Morph-channel registry for a loaded avatar.

/// Channel names treated as mouth and jaw targets when the rig exposes them.
pub const MOUTH_CHANNELS: &[&str] = &[
    "mouthOpen",
    "jawOpen",
    "viseme_aa",
    "viseme_E",
    "viseme_I",
    "viseme_O",
    "viseme_U",
    "viseme_PP",
    "viseme_FF",
    "viseme_TH",
    "viseme_DD",
    "viseme_kk",
    "viseme_CH",
    "viseme_SS",
    "viseme_nn",
    "viseme_RR",
    "viseme_sil",
    "jawForward",
    "mouthClose",
    "mouthPucker",
    "mouthLeft",
    "mouthRight",
    "mouthShrugLower",
    "mouthShrugUpper",
];

/// Channel names driven by the periodic blink pulse.
pub const BLINK_CHANNELS: &[&str] = &["eyeBlinkLeft", "eyeBlinkRight", "eyesClosed"];

/// The morph channels one loaded avatar actually exposes. The animator only
/// writes weights for channels present here, so a model missing some visemes
/// or expression shapes degrades gracefully.
#[derive(Debug, Clone)]
pub struct AvatarRig {
    channels: Vec<String>,
    mouth: Vec<String>,
    blink: Vec<String>,
}

impl AvatarRig {
    pub fn new(channels: impl IntoIterator<Item = String>) -> Self {
        let channels: Vec<String> = channels.into_iter().collect();
        let mouth = channels
            .iter()
            .filter(|name| MOUTH_CHANNELS.contains(&name.as_str()))
            .cloned()
            .collect();
        let blink = channels
            .iter()
            .filter(|name| BLINK_CHANNELS.contains(&name.as_str()))
            .cloned()
            .collect();
        AvatarRig { channels, mouth, blink }
    }

    /// A rig exposing the standard expression, blink and mouth channels.
    pub fn standard() -> Self {
        let mut channels: Vec<String> = ["mouthSmile", "mouthFrown", "mouthFunnel", "browInnerUp", "eyeSquint", "eyeWide"]
            .iter()
            .map(|name| (*name).to_owned())
            .collect();
        channels.extend(BLINK_CHANNELS.iter().map(|name| (*name).to_owned()));
        channels.extend(MOUTH_CHANNELS.iter().map(|name| (*name).to_owned()));
        AvatarRig::new(channels)
    }

    pub fn has(&self, channel: &str) -> bool {
        self.channels.iter().any(|name| name == channel)
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn mouth_channels(&self) -> &[String] {
        &self.mouth
    }

    pub fn blink_channels(&self) -> &[String] {
        &self.blink
    }
}
