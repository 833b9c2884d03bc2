//! Mock device implementations for testing and development.
//!
//! Each mock is created as a `(device, handle)` pair. The device implements
//! the matching trait; the handle scripts its behavior from a test or from
//! the simulator.

pub mod camera;
pub mod card_reader;
pub mod classifier;

pub use camera::{MockCamera, MockCameraHandle};
pub use card_reader::{MockCardReader, MockCardReaderHandle};
pub use classifier::{MockClassifier, MockClassifierHandle};
