pub mod constants;
pub mod demux;
pub mod probe;
pub mod resource;
pub mod volume;

pub use demux::StreamKind;
pub use probe::probe;
pub use resource::PlayableResource;
pub use volume::{VolumeControl, clamp_percent};
