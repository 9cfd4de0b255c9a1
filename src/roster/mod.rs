pub mod player;
pub mod roster;
pub mod toggle_batch;
