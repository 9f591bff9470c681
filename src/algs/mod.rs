//! Communication primitives shared by the linear algebra and the strategy.

pub mod communicator;
pub mod wire;

pub use communicator::{CollectiveExt, Communicator, NoComm, RayonComm, agree};
