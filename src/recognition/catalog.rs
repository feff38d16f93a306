//! Page segmentation and engine modes understood by the engine

use serde::Serialize;

/// A numbered engine setting with a description for prompt layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeInfo {
    pub value: u8,
    pub description: &'static str,
}

const fn mode(value: u8, description: &'static str) -> ModeInfo {
    ModeInfo { value, description }
}

pub const PAGE_SEGMENTATION_MODES: [ModeInfo; 14] = [
    mode(0, "Orientation and script detection (OSD) only"),
    mode(1, "Automatic page segmentation with OSD"),
    mode(2, "Automatic page segmentation, but no OSD or OCR"),
    mode(3, "Fully automatic page segmentation, but no OSD"),
    mode(4, "Assume a single column of text of variable sizes"),
    mode(5, "Assume a single uniform block of vertically aligned text"),
    mode(6, "Assume a single uniform block of text"),
    mode(7, "Treat the image as a single text line"),
    mode(8, "Treat the image as a single word"),
    mode(9, "Treat the image as a single word in a circle"),
    mode(10, "Treat the image as a single character"),
    mode(11, "Sparse text, as much as possible in no particular order"),
    mode(12, "Sparse text with OSD"),
    mode(13, "Raw line, bypassing engine-specific hacks"),
];

pub const ENGINE_MODES: [ModeInfo; 4] = [
    mode(0, "Legacy engine only"),
    mode(1, "Neural nets LSTM engine only"),
    mode(2, "Legacy + LSTM engines"),
    mode(3, "Default, based on what is available"),
];

pub fn page_segmentation_mode(value: u8) -> Option<ModeInfo> {
    PAGE_SEGMENTATION_MODES.get(value as usize).copied()
}

pub fn engine_mode(value: u8) -> Option<ModeInfo> {
    ENGINE_MODES.get(value as usize).copied()
}
