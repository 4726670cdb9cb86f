// Injection Point Module
//
// Everything that works on the injectable regions of a request:
//
// - points: counting, lookup and payload substitution with offset repair
// - discovery: finding injection points in a raw request automatically
//
// Architecture:
//   discovery.rs (builds a Request from raw bytes)
//       ↓
//   points.rs (derives variants from a Request)
//       ↓
//   builder.rs / client.rs

pub mod discovery;
pub mod points;

pub use discovery::*;
