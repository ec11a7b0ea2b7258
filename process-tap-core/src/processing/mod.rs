pub mod converter;
pub mod delivery;
