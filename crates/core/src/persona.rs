//! Age-banded persona configuration for reply generation

use serde::{Deserialize, Serialize};

use crate::profile::AgeBand;

/// Persona carried with every generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Assistant display name
    pub name: String,
    /// Child age the replies are tuned for
    pub child_age: u8,
    /// System prompt sent to the generation service
    pub system_prompt: String,
}

impl Persona {
    /// Build the German child-assistant persona for a given age
    pub fn for_age(child_age: u8) -> Self {
        let mut prompt = format!(
            "Du bist Checky, ein freundlicher Assistent für ein {child_age}-jähriges Kind.\n\
             \n\
             Regeln:\n\
             - Sprich immer auf Deutsch\n\
             - Verwende einfache Wörter für ein {child_age}-jähriges Kind\n\
             - Sei freundlich und geduldig\n\
             - Gib kurze, klare Antworten\n\
             - Halte die Unterhaltung kinderfreundlich\n\
             - Keine persönlichen Informationen über das Kind verwenden\n"
        );

        match AgeBand::from_age(child_age) {
            AgeBand::Young => {
                prompt.push_str("- Verwende sehr einfache Sprache und kurze Sätze");
            }
            AgeBand::Middle => {
                prompt.push_str("- Erkläre Konzepte mit einfachen Beispielen");
            }
            AgeBand::Older => {
                prompt.push_str("- Fördere selbstständiges Denken mit altersgerechter Sprache");
            }
        }

        Self {
            name: "Checky".to_string(),
            child_age,
            system_prompt: prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_varies_by_band() {
        let young = Persona::for_age(5);
        let middle = Persona::for_age(8);
        let older = Persona::for_age(10);
        assert!(young.system_prompt.contains("sehr einfache Sprache"));
        assert!(middle.system_prompt.contains("einfachen Beispielen"));
        assert!(older.system_prompt.contains("selbstständiges Denken"));
    }
}
