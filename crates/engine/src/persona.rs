//! Tutor persona presets and the topic catalog.
//!
//! Every mode resolves to a fixed instruction template sent once during
//! session configuration. The mode cannot change after that; callers stop
//! and start a fresh session to switch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const BASE_RULES: &str = "\
You are a friendly English tutor for a young child. Speak only English. \
Use short sentences and simple words a five year old knows. Keep every \
answer under three sentences, then hand the turn back with a question. \
When the child makes a mistake, say the sentence correctly once, warmly, \
and move on without dwelling on it. Praise effort often. Never discuss \
scary or grown-up topics; gently steer back to the activity instead.";

/// Behavioral preset for the tutor persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersonaMode {
    /// Cheerful free-form chat.
    #[default]
    Upbeat,
    /// Collaborative storytelling.
    Narrative,
    /// Question-led practice.
    Inquisitive,
}

impl PersonaMode {
    pub const ALL: [PersonaMode; 3] = [
        PersonaMode::Upbeat,
        PersonaMode::Narrative,
        PersonaMode::Inquisitive,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PersonaMode::Upbeat => "upbeat",
            PersonaMode::Narrative => "narrative",
            PersonaMode::Inquisitive => "inquisitive",
        }
    }

    /// The opening line the tutor is directed to greet with.
    pub fn greeting(&self) -> &'static str {
        match self {
            PersonaMode::Upbeat => {
                "Hi there! I'm so happy to talk with you today. What would you like to chat about?"
            }
            PersonaMode::Narrative => {
                "Hello! Let's make up a story together. Should it be about a dragon, a rocket, or something you pick?"
            }
            PersonaMode::Inquisitive => {
                "Hi! I have lots of fun questions for you today. Ready for the first one?"
            }
        }
    }

    /// The full instruction text sent inside the configuration event.
    pub fn instructions(&self) -> String {
        let mode_rules = match self {
            PersonaMode::Upbeat => {
                "Be bubbly and playful. Celebrate every answer. Keep the chat light: \
                 favorite things, fun plans, silly jokes."
            }
            PersonaMode::Narrative => {
                "Build a story together, one or two sentences per turn. Always end \
                 your turn by asking what happens next."
            }
            PersonaMode::Inquisitive => {
                "Ask one simple question at a time about the child's day, likes and \
                 ideas. Wait for the answer before asking the next one."
            }
        };
        format!(
            "{BASE_RULES}\n\n{mode_rules}\n\nOpen the conversation with exactly this \
             greeting: \"{}\"",
            self.greeting()
        )
    }
}

impl fmt::Display for PersonaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error for persona names outside the closed set.
#[derive(Debug, thiserror::Error)]
#[error("unknown persona mode: {0}")]
pub struct UnknownPersonaMode(String);

impl FromStr for PersonaMode {
    type Err = UnknownPersonaMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upbeat" => Ok(PersonaMode::Upbeat),
            "narrative" | "story" => Ok(PersonaMode::Narrative),
            "inquisitive" | "questions" => Ok(PersonaMode::Inquisitive),
            other => Err(UnknownPersonaMode(other.to_owned())),
        }
    }
}

/// One conversation-starter card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TopicCard {
    pub id: &'static str,
    pub label: &'static str,
    /// The user-turn text injected when the card is picked.
    pub prompt: &'static str,
}

/// The standard topic deck shown to the child.
pub const TOPICS: &[TopicCard] = &[
    TopicCard {
        id: "family",
        label: "My family",
        prompt: "Let's talk about my family! Ask me who is in my family.",
    },
    TopicCard {
        id: "school",
        label: "School",
        prompt: "Let's talk about school! Ask me what I did at school today.",
    },
    TopicCard {
        id: "hobbies",
        label: "Things I love",
        prompt: "Let's talk about things I love to do! Ask me about my favorite game.",
    },
    TopicCard {
        id: "books",
        label: "Stories and books",
        prompt: "Let's talk about stories! Ask me about a story I like.",
    },
    TopicCard {
        id: "imagination",
        label: "Pretend play",
        prompt: "Let's play pretend! Ask me what magical place I would visit.",
    },
    TopicCard {
        id: "food",
        label: "Yummy food",
        prompt: "Let's talk about food! Ask me about my favorite snack.",
    },
    TopicCard {
        id: "animals",
        label: "Animals",
        prompt: "Let's talk about animals! Ask me which animal I like best.",
    },
    TopicCard {
        id: "games",
        label: "Games to play",
        prompt: "Let's talk about games! Ask me what I like to play outside.",
    },
];

/// Looks a topic card up by id.
pub fn topic(id: &str) -> Option<&'static TopicCard> {
    TOPICS.iter().find(|card| card.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_embed_the_greeting() {
        for mode in PersonaMode::ALL {
            let instructions = mode.instructions();
            assert!(instructions.contains(mode.greeting()), "{mode} greeting missing");
            assert!(instructions.contains("English tutor"));
        }
    }

    #[test]
    fn instruction_templates_differ_per_mode() {
        let upbeat = PersonaMode::Upbeat.instructions();
        let narrative = PersonaMode::Narrative.instructions();
        let inquisitive = PersonaMode::Inquisitive.instructions();
        assert_ne!(upbeat, narrative);
        assert_ne!(narrative, inquisitive);
        assert_ne!(upbeat, inquisitive);
    }

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!("upbeat".parse::<PersonaMode>().unwrap(), PersonaMode::Upbeat);
        assert_eq!("Story".parse::<PersonaMode>().unwrap(), PersonaMode::Narrative);
        assert_eq!(
            "questions".parse::<PersonaMode>().unwrap(),
            PersonaMode::Inquisitive
        );
        assert!("pirate".parse::<PersonaMode>().is_err());
    }

    #[test]
    fn topic_lookup() {
        let card = topic("animals").unwrap();
        assert_eq!(card.label, "Animals");
        assert!(card.prompt.contains("animal"));
        assert!(topic("calculus").is_none());

        let mut ids: Vec<&str> = TOPICS.iter().map(|card| card.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), TOPICS.len(), "topic ids must be unique");
    }
}
