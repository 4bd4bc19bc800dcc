pub mod gradient;
pub mod hmm;
pub mod layout;
pub mod mixture;
pub mod model;
pub mod objective;
pub mod params;

pub use layout::BlockLayout;
pub use model::MixtureHmm;
pub use objective::{objective, ObjectiveResult};
