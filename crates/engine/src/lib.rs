//! Conversational session engine for the prattle voice buddy.
//!
//! Sits between a realtime transport ([`prattle_realtime`]) and whatever
//! renders the avatar: orchestrates the session lifecycle, interprets the
//! control-event stream into expressive state, and turns that state plus the
//! remote audio into pose frames.

pub mod avatar;
pub mod error;
pub mod interpret;
pub mod persona;
pub mod session;
pub mod state;

pub use avatar::{Animator, AvatarRig, EmotionTarget, PoseFrame};
pub use error::EngineError;
pub use interpret::Timings;
pub use persona::{PersonaMode, TOPICS, TopicCard, topic};
pub use session::{EngineSettings, SessionEngine};
pub use state::{SessionState, SharedState};
