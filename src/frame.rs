pub mod data;
pub mod draw;
pub mod geometry;
pub mod pixel;
pub mod transform;
pub mod video_format;
