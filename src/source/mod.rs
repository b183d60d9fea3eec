pub mod descriptor;
pub mod extractor;
pub mod stream;
pub mod traits;

pub use descriptor::SourceDescriptor;
pub use extractor::{Extractor, ExtractorProcess};
pub use stream::{Chunk, SourceStream};
pub use traits::{AcquiredSource, AudioSource, SourceProcess, TrackMetadata};
