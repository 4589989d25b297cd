//! Per-tick transforms: color reformatting and depth registration

pub mod color;
pub mod encode;
pub mod mapper;

pub use color::ColorSpaceConverter;
pub use encode::{decode, encode, DepthEncoder, EncodeStats, MAX_ENCODABLE_DEPTH};
pub use mapper::CoordinateMapper;
