//! MJPEG egress over HTTP

pub mod generator;
pub mod server;

pub use generator::{
    encode_jpeg, multipart_chunk, Pacer, StreamGenerator, StreamSettings, BOUNDARY, CONTENT_TYPE,
};
pub use server::{router, serve, AppState};
