mod data;
mod fluid;
pub mod render;
pub mod settings;

pub use fluid::Fluid;
pub use render::{Context, Problem};
pub use settings::Settings;
