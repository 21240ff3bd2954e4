//! Persona catalog: selectable system prompts with theme metadata.
//!
//! Prompts are opaque to the engine, which only reads `system_prompt` when
//! an exchange starts.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_PERSONA_ID: &str = "armin-core";

const CORE_PROMPT: &str = r#"You are "Armin AI", a patient and deeply knowledgeable teacher.

Answer thoroughly. Build explanations step by step and paint concepts vividly.

Images:
When you explain a formula, a physical or biological structure, or a historical event, request an illustration by writing this exact tag on its own line:
<<GENERATE_IMAGE: detailed description of the educational diagram or scene>>
Write the tag at most once per answer.

Math:
Always use LaTeX. Use $$ ... $$ for block equations on their own line and $ ... $ for inline math.

Files:
When asked for structured data (CSV, JSON), put the raw content in a fenced code block.

Use the search tool when you need current information."#;

#[derive(Debug, Error)]
pub enum PersonaError {
    #[error("Failed to read persona catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid persona catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Persona catalog is empty")]
    Empty,
}

/// Presentation hints, ignored by the engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub accent: String,
    pub background: String,
    pub text: String,
    pub icon: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub theme: Theme,
}

fn builtin(
    id: &str,
    name: &str,
    description: &str,
    role: Option<&str>,
    theme: [&str; 4],
) -> Persona {
    let system_prompt = match role {
        Some(role) => format!("{}\n\n{}", CORE_PROMPT, role),
        None => CORE_PROMPT.to_string(),
    };
    let [accent, background, text, icon] = theme;
    Persona {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        system_prompt,
        theme: Theme {
            accent: accent.to_string(),
            background: background.to_string(),
            text: text.to_string(),
            icon: icon.to_string(),
        },
    }
}

#[derive(Clone, Debug)]
pub struct PersonaCatalog {
    personas: Vec<Persona>,
}

impl Default for PersonaCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PersonaCatalog {
    pub fn builtin() -> Self {
        let personas = vec![
            builtin(
                DEFAULT_PERSONA_ID,
                "Armin AI",
                "The central intelligence, broad and tireless",
                None,
                ["#9333ea", "#0f0518", "#faf5ff", "🌌"],
            ),
            builtin(
                "mathematician",
                "Cosmic Mathematician",
                "Complex problems with precise formulas",
                Some(
                    "ROLE: mathematician. Focus on calculus, algebra, geometry and statistics. \
                     Every symbol goes in LaTeX. Illustrate geometric problems with a \
                     <<GENERATE_IMAGE: ...>> tag.",
                ),
                ["#2563eb", "#0a0a20", "#eff6ff", "➗"],
            ),
            builtin(
                "physicist",
                "Quantum Physicist",
                "The laws of nature from atoms to galaxies",
                Some(
                    "ROLE: physicist. Focus on mechanics, thermodynamics, quantum physics and \
                     relativity. Formulas in LaTeX. Visualize phenomena with a \
                     <<GENERATE_IMAGE: ...>> tag.",
                ),
                ["#ea580c", "#20100a", "#fff7ed", "⚛️"],
            ),
            builtin(
                "chemist",
                "Molecular Chemist",
                "Elements, compounds and reactions",
                Some(
                    "ROLE: chemist. Focus on organic, inorganic and physical chemistry. Write \
                     reactions in LaTeX (e.g. $$ H_2O $$). Draw molecular structures with a \
                     <<GENERATE_IMAGE: ...>> tag.",
                ),
                ["#059669", "#0a2015", "#ecfdf5", "🧪"],
            ),
            builtin(
                "engineer",
                "Engineer",
                "Advanced programming and software engineering",
                Some(
                    "ROLE: software engineer. Write correct, idiomatic code in fenced blocks \
                     with a language tag and explain the logic. Sketch UI mockups with a \
                     <<GENERATE_IMAGE: ...>> tag.",
                ),
                ["#06b6d4", "#000000", "#22d3ee", "💻"],
            ),
            builtin(
                "doctor",
                "Doctor",
                "Calm, careful medical explanations",
                Some(
                    "ROLE: physician. Keep a calm, clinical tone and recommend seeing a \
                     professional for diagnosis. Show anatomy with a <<GENERATE_IMAGE: ...>> tag.",
                ),
                ["#60a5fa", "#f0f9ff", "#0f172a", "⚕️"],
            ),
            builtin(
                "historian",
                "Time Keeper",
                "History with a long memory",
                Some(
                    "ROLE: historian. Narrate events vividly with dates and context. Recreate \
                     historical scenes with a <<GENERATE_IMAGE: ...>> tag.",
                ),
                ["#d97706", "#2a1a0a", "#fef3c7", "⏳"],
            ),
        ];
        Self { personas }
    }

    /// Catalog from a JSON array of personas
    pub fn from_json_str(json: &str) -> Result<Self, PersonaError> {
        let personas: Vec<Persona> = serde_json::from_str(json)?;
        if personas.is_empty() {
            return Err(PersonaError::Empty);
        }
        Ok(Self { personas })
    }

    pub fn load(path: &Path) -> Result<Self, PersonaError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn get(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// The built-in default when present, else the first entry
    pub fn default_persona(&self) -> &Persona {
        self.get(DEFAULT_PERSONA_ID).unwrap_or(&self.personas[0])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Persona> {
        self.personas.iter()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}
