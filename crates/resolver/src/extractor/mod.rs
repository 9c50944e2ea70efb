pub mod html;
pub mod patterns;
pub mod stream_extractor;

pub use stream_extractor::{ExtractorOptions, StreamExtractor};
