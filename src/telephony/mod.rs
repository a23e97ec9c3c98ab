pub mod events;
pub mod instructions;
pub mod webhook;
