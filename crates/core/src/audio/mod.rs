pub mod source;

pub use source::{DecodedAudio, MonoBuffer, SourceError, SourceSnapshot};
