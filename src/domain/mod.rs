// Domain layer: booking models and ports (interfaces). Adapters live under src/adapters.

pub mod model;
pub mod ports;
