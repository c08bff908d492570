pub mod deadline;
pub mod delivery;
pub mod errors;
pub mod events;
pub mod order;
pub mod payment;
pub mod ports;
