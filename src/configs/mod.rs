pub mod base;
pub mod extractor;
pub mod health;
pub mod logging;
pub mod player;

pub use base::*;
pub use extractor::*;
pub use health::*;
pub use logging::*;
pub use player::*;
