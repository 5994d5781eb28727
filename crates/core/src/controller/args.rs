//! Fixed transcoding policy and engine argument construction.

use super::types::Resolution;

/// Virtual name the source asset is staged under.
pub const INPUT_NAME: &str = "input.mp4";

/// Virtual name the engine writes the compressed video to.
pub const OUTPUT_NAME: &str = "output.mp4";

/// File name used when the result is saved.
pub const DOWNLOAD_FILE_NAME: &str = "compressed_video.mp4";

/// MIME type of the result.
pub const OUTPUT_MIME_TYPE: &str = "video/mp4";

/// H.264 encoder.
pub const VIDEO_CODEC: &str = "libx264";

/// Constant rate factor.
pub const CRF: u8 = 28;

/// x264 preset.
pub const PRESET: &str = "fast";

/// Builds the engine command for one job:
/// `-i input.mp4 -vf scale=-2:<H> -c:v libx264 -crf 28 -preset fast output.mp4`.
///
/// Width `-2` keeps the aspect ratio while forcing an even width.
pub fn transcode_args(resolution: Resolution) -> Vec<String> {
    vec![
        "-i".to_string(),
        INPUT_NAME.to_string(),
        "-vf".to_string(),
        format!("scale=-2:{}", resolution.height()),
        "-c:v".to_string(),
        VIDEO_CODEC.to_string(),
        "-crf".to_string(),
        CRF.to_string(),
        "-preset".to_string(),
        PRESET.to_string(),
        OUTPUT_NAME.to_string(),
    ]
}
