//! Collaborator traits
//!
//! These traits define the interface between the update engine and the
//! board: controller registers, power rails and clocks, the temperature
//! sensor, and the image co-processor.

pub mod pipeline;
pub mod power;
pub mod registers;
pub mod sensor;

pub use pipeline::{ImagePipeline, PipelineError};
pub use power::{PowerRails, Rail, RailError};
pub use registers::RegisterBus;
pub use sensor::{SensorError, TemperatureSensor};
