//! Module that contains everything related to cluster membership: the metadata every node
//! advertises, the load balancer's aggregated view of the backends and joining the cluster at startup.
pub mod bootstrap;
pub mod delegate;
pub mod event;
pub mod metadata;
pub mod state;
