pub mod connection_state;
pub mod controller_config;
pub mod controller_state;
pub mod roster_controller;
