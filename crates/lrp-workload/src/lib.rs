//! Pure translation of LRPs into Kubernetes workload primitives
//!
//! Nothing in this crate talks to a cluster. The controller crate submits
//! what is built here and reads it back through [`reconstruct`].

#![deny(missing_docs)]

pub mod disruption_budget;
pub mod instance_index;
pub mod naming;
pub mod probes;
pub mod reconstruct;
pub mod translator;

pub use naming::{Hasher, NameStrategy, TruncatedSha256Hasher};
pub use probes::{LivenessProbeCreator, ProbeCreator, ReadinessProbeCreator};
pub use reconstruct::lrp_from_statefulset;
pub use translator::{ResourceGraph, StatefulSetTranslator, TranslatorConfig};
