pub mod behavior;
pub mod classifier;
pub mod pattern;
pub mod session;
pub mod velocity;
