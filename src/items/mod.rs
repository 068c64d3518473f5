//! Concrete item schemas.

mod airport;
mod place;

pub use airport::Airport;
pub use place::Place;
