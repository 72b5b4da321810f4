use serde::Serialize;

use super::audio_format::AudioFormat;

/// Where the negotiated output format came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatChoice {
    /// The endpoint accepted the requested format as is.
    Desired,
    /// The endpoint rejected the request; its own mix format is used.
    DeviceNative,
    /// The endpoint proposed the closest format it supports.
    ClosestMatch,
}

/// Formats settled by the format negotiator before the session is built.
///
/// Passed explicitly into session construction; the capture side only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NegotiatedFormats {
    pub output_format: AudioFormat,
    pub choice: FormatChoice,
}
