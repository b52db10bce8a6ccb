pub mod model;
pub mod network;
pub mod spec;
pub mod stage_net;

pub use model::{Mode, ModelState, NamedTensor, SegmentationModel, StageGradients, StageOutputs};
pub use network::Network;
pub use spec::ModelSpec;
pub use stage_net::TwoStageNet;
