mod handler;
mod model;

pub use handler::{find_nearby, update_location};
