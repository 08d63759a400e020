pub mod bus;
pub mod error;
pub mod gateway;
pub mod relay;
pub mod thermostat;
pub mod topics;
