// Library exports for cursorforge

pub mod builder;
pub mod config;
pub mod error;
pub mod formats;
pub mod fs_ops;
pub mod gen_config;
pub mod model;
pub mod pipeline_worker;
pub mod tools;

pub use builder::{BuilderFactory, CursorBuilder, CursorBuilderFactory, OutputFormat};
pub use config::BuildConfig;
pub use error::{CursorError, Result};
pub use formats::{CursorFormat, Detection, detect_file};
pub use gen_config::{CursorGenConfig, FrameEntry};
pub use model::{CursorData, CursorFrame, CursorImage, CursorNames, Hotspot, STATIC_FRAME};
pub use pipeline_worker::ConcurrentFactory;
