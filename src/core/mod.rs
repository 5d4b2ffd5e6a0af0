// Decoder core: value scanning, chunked streaming, and error modeling.
pub mod error;
pub mod scan;
pub mod stream;
