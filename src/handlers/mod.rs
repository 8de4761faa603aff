mod health;
mod tasks;

pub use health::*;
pub use tasks::*;
