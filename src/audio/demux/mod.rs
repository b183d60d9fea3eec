pub mod format;

pub use format::{StreamKind, classify, detect_format};
