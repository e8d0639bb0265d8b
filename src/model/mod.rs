pub mod cursor;
pub mod names;

pub use cursor::{CursorData, CursorFrame, CursorImage, FrameTable, Hotspot, STATIC_FRAME};
pub use names::CursorNames;
