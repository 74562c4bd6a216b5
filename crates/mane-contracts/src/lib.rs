pub mod catalog;
pub mod events;
pub mod items;
pub mod payload;
