pub mod cache;
pub mod executor;
pub mod regime;
pub mod scorer;
pub mod weights;
