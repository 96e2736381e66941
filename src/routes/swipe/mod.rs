mod handler;
pub mod model;

pub use handler::{create_swipe, get_quota};
