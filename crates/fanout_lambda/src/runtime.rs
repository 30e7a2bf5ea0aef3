pub use fanout_core::{contract, queue, telemetry, transport};
