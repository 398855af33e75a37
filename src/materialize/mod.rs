//! Get-or-create image cache
//!
//! [`ImageMaterializer`] guarantees that every (image, spec) pair is fetched
//! and transformed at most once: a stored variant is always served from the
//! blob store, and concurrent requests for a missing one share a single
//! flight through [`FlightGroup`].

mod flight;
mod materializer;

pub use flight::{Flight, FlightError, FlightGroup, FlightLease, Joined};
pub use materializer::{
    ImageMaterializer, MaterializeError, MaterializeOutcome, Materialization, MaterializedImage,
    RetryPolicies,
};
