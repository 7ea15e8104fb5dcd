pub mod chunks;
pub mod decode;
pub mod http;
pub mod mock;

pub use chunks::ChunkStream;
pub use decode::Utf8ChunkDecoder;
pub use http::HttpTransport;
pub use mock::{MockResponse, MockTransport};
