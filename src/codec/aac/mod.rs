//! ADTS framing and AudioSpecificConfig construction.

pub mod parser;
pub mod silence;
pub mod types;

pub use parser::{parse_adts_header, AAC_SAMPLES_PER_FRAME};
pub use silence::silent_frame;
pub use types::{AACConfig, ADTSHeader, ProfileType};
