//! Canned replies for degraded turns
//!
//! Degraded functionality always prefers a spoken, generic response over
//! silence. The wording is tuned to the product's German surface.

use checky_core::AgeBand;

/// Reply when no speech was detected in the turn
pub fn didnt_hear(band: AgeBand) -> &'static str {
    match band {
        AgeBand::Young => "Ich habe dich nicht gehört. Sag es noch mal!",
        _ => "Ich habe dich leider nicht gehört. Kannst du das bitte wiederholen?",
    }
}

/// Reply when an upstream service failed or the turn ran out of time
pub fn apology(band: AgeBand) -> &'static str {
    match band {
        AgeBand::Young => "Ups, das hat nicht geklappt. Versuch es gleich noch mal!",
        _ => "Entschuldigung, da ist etwas schiefgegangen. Bitte versuch es gleich noch einmal.",
    }
}

/// Status text when a turn is rejected by rate limiting
pub fn please_wait() -> &'static str {
    "Bitte warte einen kleinen Moment, bevor du wieder sprichst."
}
