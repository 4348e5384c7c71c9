pub mod core;
pub mod distributions;
pub mod error;
pub mod history;
pub mod importance_sampling;
pub mod indicator;
pub mod io;
pub mod stats;
