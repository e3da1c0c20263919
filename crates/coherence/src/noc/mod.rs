//! Network-on-chip modelling.
//!
//! The five virtual channels of the platform (direct command, direct
//! response, M2P coherence, P2M coherence, CLACK) share the mesh in the
//! hardware but are logically independent; each is modelled here as an
//! ordered delivery queue per destination endpoint with cycle-boundary
//! visibility. The routers themselves are external collaborators: only
//! their ordering contract is reproduced.
//!
//! 1. **Codec:** [`dhccp`] is the bit-exact flit codec for the three
//!    coherence channels.
//! 2. **Channels:** [`channel::Channel`] is the generic ordered queue used
//!    for all five networks.

/// Bit-exact coherence flit codec.
pub mod dhccp;

/// Ordered per-destination delivery queues.
pub mod channel;

pub use channel::Channel;
