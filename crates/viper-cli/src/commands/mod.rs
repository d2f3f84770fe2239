pub mod render;
pub mod settings;
