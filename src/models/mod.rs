pub mod car;
pub mod image;
pub mod user;

pub use car::*;
pub use image::*;
pub use user::*;
