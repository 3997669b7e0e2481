#![deny(rust_2018_idioms)]

mod api;
pub mod conditions;
mod workloads;

pub use self::{
    api::{Cluster, ClusterStream},
    workloads::Workloads,
};
