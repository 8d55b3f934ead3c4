pub mod audio;
pub mod device;
pub mod espeak;
pub mod output;

pub use espeak::EspeakEngine;
