pub mod negotiation;
pub mod resampler;
pub mod wav_format;
