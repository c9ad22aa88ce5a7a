//! Adapter traits for the external speech services

pub mod generate;
pub mod speech;

pub use generate::{GenerateRequest, ReplyGenerator};
pub use speech::{AudioStream, RecognitionStream, SpeechRecognizer, SpeechSynthesizer};
