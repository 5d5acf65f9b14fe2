pub mod appointment;
pub mod booking;
pub mod patient;
pub mod scheduling;
