pub mod controller;
pub mod messaging;
pub mod roster;
pub mod test_util;
