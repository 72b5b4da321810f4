use crate::models::audio_format::AudioFormat;
use crate::models::negotiated::{FormatChoice, NegotiatedFormats};

/// Endpoint answer to "do you accept this format in shared mode?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSupport {
    Supported,
    /// Not supported as is; the endpoint proposes this format instead.
    ClosestMatch(AudioFormat),
    Unsupported,
}

/// Format requested from every output endpoint: 16-bit stereo PCM at 44.1 kHz.
pub fn desired_output_format() -> AudioFormat {
    AudioFormat::pcm(2, 44100, 16)
}

/// Settle the output format from the endpoint's answer for `desired`.
///
/// Exact support wins, then the endpoint's closest match, then its own mix
/// format.
pub fn choose_output_format(desired: AudioFormat, mix_format: AudioFormat, support: FormatSupport) -> NegotiatedFormats {
    let (output_format, choice) = match support {
        FormatSupport::Supported => (desired, FormatChoice::Desired),
        FormatSupport::ClosestMatch(closest) => (closest, FormatChoice::ClosestMatch),
        FormatSupport::Unsupported => (mix_format, FormatChoice::DeviceNative),
    };
    log::info!("Output format {} ({:?})", output_format, choice);
    NegotiatedFormats { output_format, choice }
}
