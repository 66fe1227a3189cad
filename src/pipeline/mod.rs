//! # Response Pipeline
//!
//! From a caller's utterance to the agent's spoken reply: collaborator contracts,
//! sentence segmentation, the cancellable per-connection turn state machine and
//! the offline collaborators used for local development.

pub mod collaborators;
pub mod offline;
pub mod response;
pub mod segmenter;

pub use collaborators::Collaborators;
pub use response::{
    AudioChunk, Delivery, DeliveryQueue, InterruptHandle, PipelineStats, ResponsePipeline,
};
