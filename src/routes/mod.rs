pub mod location;
pub mod swipe;
