//! Power draw sampling, rolling and lifetime statistics, component power
//! models and battery life estimation.

pub mod battery;
pub mod benchmark;
pub mod charger;
pub mod clock;
pub mod collection;
pub mod context;
pub mod model;
pub mod persistence;
pub mod point;
pub mod sensor;
pub mod settings;
pub mod statistics;
pub mod sync;
pub mod worker;

pub use context::{BenchmarkKind, Devices, PowerContext};
